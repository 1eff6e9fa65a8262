use std::path::Path;

use serde_yaml::Value;
use service::Plugin;

async fn create_plugins(_configs: Vec<Value>) -> Vec<(&'static str, Box<dyn Plugin>)> {
    Vec::new()
}

fn do_test(path: &Path) -> datatest_stable::Result<()> {
    tokio::runtime::Runtime::new()
        .unwrap()
        .block_on(testutil::run_yaml_file(path, create_plugins));
    Ok(())
}

datatest_stable::harness!(do_test, "tests", r"^.*/*.yaml");
