//! The shipped Greenbone plan must load and validate.

use std::path::Path;

use provision::core::types::{Operation, Severity};
use provision::io::plan::Plan;

fn sample() -> Plan {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../plans/greenbone.toml");
    Plan::load(&path, |key| {
        (key == "BUILD_DIR").then(|| "/srv/build".to_string())
    })
    .expect("load sample plan")
}

#[test]
fn sample_plan_loads() {
    let plan = sample();
    assert_eq!(plan.steps.len(), 16);
    assert_eq!(plan.context.settings.service_user.as_deref(), Some("gvm"));
    assert_eq!(plan.context.layout.build_dir, Path::new("/srv/build"));

    let feed = plan
        .steps
        .iter()
        .find(|s| s.name == "feed-sync")
        .expect("feed-sync step");
    assert_eq!(feed.severity, Severity::Optional);

    let admin = plan
        .steps
        .iter()
        .find(|s| s.name == "admin-user")
        .expect("admin-user step");
    assert!(admin.capture.is_some());
}

#[test]
fn unit_file_is_rendered_with_service_user() {
    let plan = sample();
    let unit = plan
        .steps
        .iter()
        .find(|s| s.name == "gvmd-unit")
        .expect("gvmd-unit step");
    let Operation::WriteFile(spec) = &unit.action[0] else {
        panic!("expected write_file");
    };
    assert!(spec.contents.contains("User=gvm\n"));
    assert!(spec.contents.contains("ExecStart=/usr/local/sbin/gvmd --foreground"));
    assert_eq!(spec.mode, 0o644);
}
