//! Hint resolution with per-strategy fallback.

use std::time::Duration;

use tracing::{debug, info};

use crate::error::AgentError;
use crate::page::{Locator, Page};
use crate::types::SelectorBundle;

/// Resolve `hint` to the first visible locator among its bundle candidates.
///
/// Descriptors are tried in bundle order; within a descriptor the locator
/// kinds go css, role, text, testId, xpath. Each attempt gets `budget` to
/// become visible. A hint missing from the bundle fails immediately.
pub async fn resolve(
    hint: &str,
    page: &dyn Page,
    bundle: &SelectorBundle,
    budget: Duration,
) -> Result<Locator, AgentError> {
    let prefs = bundle.get(hint).map(Vec::as_slice).unwrap_or_default();
    debug!(hint, candidates = prefs.len(), "resolving selector");

    for pref in prefs {
        for locator in Locator::candidates(pref) {
            match page.wait_visible(&locator, budget).await {
                Ok(()) => {
                    info!(hint, %locator, "selector resolved");
                    return Ok(locator);
                }
                Err(e) => debug!(hint, %locator, error = %e, "strategy missed"),
            }
        }
    }

    Err(AgentError::SelectorResolution {
        hint: hint.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePage;
    use crate::types::{RoleQuery, SelectorDescriptor};
    use pretty_assertions::assert_eq;

    const BUDGET: Duration = Duration::from_millis(600);

    fn bundle(hint: &str, descs: Vec<SelectorDescriptor>) -> SelectorBundle {
        SelectorBundle::from([(hint.to_string(), descs)])
    }

    #[tokio::test]
    async fn text_only_descriptor_skips_css_and_role() {
        let page = FakePage::new();
        page.show("text=\"Sign in\"");
        let bundle = bundle(
            "login",
            vec![SelectorDescriptor {
                text: Some("Sign in".into()),
                exact: true,
                ..Default::default()
            }],
        );

        let loc = resolve("login", &page, &bundle, BUDGET).await.unwrap();

        assert_eq!(loc, Locator::text("Sign in", true));
        assert_eq!(page.calls(), vec!["wait text=\"Sign in\"".to_string()]);
    }

    #[tokio::test]
    async fn falls_through_kinds_then_descriptors() {
        let page = FakePage::new();
        page.show("xpath=//button[2]");
        let bundle = bundle(
            "submit",
            vec![
                SelectorDescriptor {
                    css: Some("#submit".into()),
                    role: Some(RoleQuery {
                        role: "button".into(),
                        name: Some("Submit".into()),
                    }),
                    ..Default::default()
                },
                SelectorDescriptor {
                    test_id: Some("submit-btn".into()),
                    xpath: Some("//button[2]".into()),
                    ..Default::default()
                },
            ],
        );

        let loc = resolve("submit", &page, &bundle, BUDGET).await.unwrap();

        assert_eq!(loc.kind.name(), "xpath");
        assert_eq!(
            page.calls(),
            vec![
                "wait css=#submit",
                "wait role=button[name=\"Submit\"]",
                "wait testid=submit-btn",
                "wait xpath=//button[2]",
            ]
        );
    }

    #[tokio::test]
    async fn first_visible_match_wins() {
        let page = FakePage::new();
        page.show("css=#a").show("css=#b");
        let bundle = bundle(
            "field",
            vec![
                SelectorDescriptor {
                    css: Some("#a".into()),
                    ..Default::default()
                },
                SelectorDescriptor {
                    css: Some("#b".into()),
                    ..Default::default()
                },
            ],
        );

        let loc = resolve("field", &page, &bundle, BUDGET).await.unwrap();
        assert_eq!(loc, Locator::css("#a"));
        assert_eq!(page.calls().len(), 1);
    }

    #[tokio::test]
    async fn unknown_hint_fails_without_polling() {
        let page = FakePage::new();
        let err = resolve("missing", &page, &SelectorBundle::new(), BUDGET)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AgentError::SelectorResolution {
                hint: "missing".into()
            }
        );
        assert!(page.calls().is_empty());
    }
}
