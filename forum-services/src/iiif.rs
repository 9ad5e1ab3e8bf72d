use contract_replay::{BodyMatcher, ExpectedResponse, Interaction, Method, Request};
use serde_json::json;
use url::form_urlencoded;

/// A record whose media lives on the Sagoku image store.
pub const SAMPLE_DATE_PATH: &str = "/2019/03/19/17/";
pub const SAMPLE_UUID: &str = "d0434e64-0793-4017-83f6-5895d82fd897";

pub const INFO_JSON: &str = "a request for the image information of a record";
pub const IMAGE_VIEW: &str = "a request for the full image of a record";

const CORS_HEADER: &str = "access-control-allow-origin";

/// The IIIF identifier of a record, `<date path without leading slash><uuid>`, escaped so it
/// fits in one path segment.
pub fn identifier(date_path: &str, uuid: &str) -> String {
    let raw = format!("{}{}", date_path.trim_start_matches('/'), uuid);
    form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

fn image_path(date_path: &str, uuid: &str) -> String {
    format!("/iiif/fpx/{}", identifier(date_path, uuid))
}

pub fn info_json(date_path: &str, uuid: &str) -> Request {
    Request::new(Method::Get, format!("{}/info.json", image_path(date_path, uuid)))
}

/// The whole image at its native size.
pub fn image_view(date_path: &str, uuid: &str) -> Request {
    Request::new(
        Method::Get,
        format!("{}/full/full/0/default.jpg", image_path(date_path, uuid)),
    )
}

/// `info.json` must allow cross-origin reads, carry the image information shape, and name
/// the record in its `@id`.
pub fn iiif_interactions(date_path: &str, uuid: &str) -> Vec<Interaction> {
    let info_shape = json!({
        "@id": format!("http://localhost/iiif/fpx/{}", identifier(date_path, uuid)),
        "protocol": "http://iiif.io/api/image",
        "width": 1,
        "height": 1,
    });

    vec![
        Interaction::new(
            INFO_JSON,
            None,
            info_json(date_path, uuid),
            ExpectedResponse::new(200)
                .with_header(CORS_HEADER, "*")
                .with_body(BodyMatcher::Like(info_shape))
                .with_field_pattern("$.@id", regex::escape(&identifier(date_path, uuid))),
        ),
        Interaction::new(
            IMAGE_VIEW,
            None,
            image_view(date_path, uuid),
            ExpectedResponse::new(200).with_body(BodyMatcher::Present),
        ),
    ]
}
