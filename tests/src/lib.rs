pub mod stub_jobmanager;

#[cfg(test)]
mod contract_tests;
#[cfg(test)]
mod state_tests;
