pub mod end_to_end_tests;
pub mod remote_policy_tests;
pub mod schematron_cache_tests;
