use agentic_rpa::dsl::compile;
use agentic_rpa::{AgentError, Locator, LocatorKind, RoleQuery, Step, WaitTarget};
use pretty_assertions::assert_eq;

#[test]
fn multi_line_task_lowers_to_steps() {
    let task = r#"
open https://example.com
type css=#search "rust async"
click role=button[name="Search"]
waitFor text="Results"
getText //h2[1]
waitNetworkIdle 500
download testid=export
screenshot Results Page.png
"#;
    let program = compile(task).unwrap();

    let ops: Vec<_> = program.steps.iter().map(Step::op).collect();
    assert_eq!(
        ops,
        vec![
            "goto",
            "type",
            "click",
            "waitFor",
            "getText",
            "waitNetworkIdle",
            "download",
            "screenshot"
        ]
    );
    assert_eq!(
        program.steps[3],
        Step::WaitFor {
            target: WaitTarget::Text {
                text: "Results".into()
            }
        }
    );
}

#[test]
fn selector_prefixes_become_bundle_candidates() {
    let program =
        compile(r#"click role=button[name="Search"] -> getText //h2[1] -> download testid=export"#)
            .unwrap();

    let first = |hint: &str| Locator::candidates(&program.bundle[hint][0])[0].clone();

    assert_eq!(
        first(r#"role=button[name="Search"]"#).kind,
        LocatorKind::Role(RoleQuery {
            role: "button".into(),
            name: Some("Search".into()),
        })
    );
    assert_eq!(first("//h2[1]").kind, LocatorKind::XPath("//h2[1]".into()));
    assert_eq!(first("testid=export").kind, LocatorKind::TestId("export".into()));
}

#[test]
fn one_bad_line_rejects_everything() {
    assert_eq!(
        compile("open https://example.com -> hover #menu").unwrap_err(),
        AgentError::UnknownStep("hover #menu".into())
    );
}
