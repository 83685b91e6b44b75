//! End-to-end reconciliation against the memory backend

mod common;

use std::collections::HashSet;

use tool_store::{ToolId, ToolStatus};
use tooltrack::{
    qr::{DecodeError, QrDecoder},
    InventoryError,
};

const TOOLS: &[(&str, &str, &str)] = &[
    ("INV-001", "qr-drill", "Drill"),
    ("INV-002", "qr-grinder", "Angle grinder"),
    ("INV-003", "qr-level", "Laser level"),
];

fn ids(summaries: &[tooltrack::ToolSummary]) -> HashSet<ToolId> {
    summaries.iter().map(|s| s.id).collect()
}

#[tokio::test]
async fn test_two_of_three_scanned() {
    let (yard, _) = common::yard(TOOLS).await;
    let outcome = yard
        .app
        .reconciler
        .reconcile(yard.north.id, yard.worker.id, ["qr-drill", "qr-level"])
        .await
        .unwrap();

    let report = &outcome.report;
    assert_eq!(report.total, 3);
    assert_eq!(report.found_count(), 2);
    assert_eq!(report.missing_count(), 1);
    assert_eq!(report.missing[0].name, "Angle grinder");
    assert_eq!(report.performed_by, "Ivanov");

    let grinder = yard.app.registry.get_tool(yard.tools[1].id).await.unwrap();
    assert_eq!(grinder.status, ToolStatus::Lost);
    let drill = yard.app.registry.get_tool(yard.tools[0].id).await.unwrap();
    assert_eq!(drill.status, ToolStatus::Present);

    let found: HashSet<ToolId> = outcome.check.tool_ids.iter().copied().collect();
    assert_eq!(found, ids(&report.found));

    let text = report.summary_text();
    assert!(text.contains("Total tools: 3"));
    assert!(text.contains("- Angle grinder (inv. #INV-002)"));
}

#[tokio::test]
async fn test_empty_scan_marks_everything_lost() {
    let (yard, _) = common::yard(TOOLS).await;
    let outcome = yard
        .app
        .reconciler
        .reconcile(yard.north.id, yard.worker.id, Vec::<String>::new())
        .await
        .unwrap();

    assert_eq!(outcome.report.found_count(), 0);
    assert_eq!(outcome.report.missing_count(), 3);
    assert!(outcome.check.tool_ids.is_empty());
    for tool in yard.app.registry.list_tools_at_site(yard.north.id).await.unwrap() {
        assert_eq!(tool.status, ToolStatus::Lost);
    }
}

#[tokio::test]
async fn test_unknown_and_foreign_codes_are_ignored() {
    let (yard, _) = common::yard(TOOLS).await;
    yard.app
        .registry
        .register_tool("INV-100", "qr-mixer", "Concrete mixer", Some(yard.south.id))
        .await
        .unwrap();

    let outcome = yard
        .app
        .reconciler
        .reconcile(
            yard.north.id,
            yard.worker.id,
            ["qr-drill", "no-such-code", "qr-mixer", "  qr-drill  ", ""],
        )
        .await
        .unwrap();

    assert_eq!(outcome.report.total, 3);
    assert_eq!(ids(&outcome.report.found), HashSet::from([yard.tools[0].id]));

    // The other site's tool is untouched.
    let south = yard.app.registry.list_tools_at_site(yard.south.id).await.unwrap();
    assert_eq!(south[0].status, ToolStatus::Present);
}

#[tokio::test]
async fn test_found_and_missing_partition_the_site() {
    let (yard, _) = common::yard(TOOLS).await;
    let outcome = yard
        .app
        .reconciler
        .reconcile(yard.north.id, yard.worker.id, ["qr-grinder"])
        .await
        .unwrap();

    let found = ids(&outcome.report.found);
    let missing = ids(&outcome.report.missing);
    assert!(found.is_disjoint(&missing));
    let all: HashSet<ToolId> = yard.tools.iter().map(|t| t.id).collect();
    assert_eq!(&found | &missing, all);
}

#[tokio::test]
async fn test_repeat_pass_is_stable_and_recovers_lost_tools() {
    let (yard, _) = common::yard(TOOLS).await;
    let reconciler = &yard.app.reconciler;

    let first = reconciler
        .reconcile(yard.north.id, yard.worker.id, ["qr-drill"])
        .await
        .unwrap();
    let second = reconciler
        .reconcile(yard.north.id, yard.worker.id, ["qr-drill"])
        .await
        .unwrap();
    assert_eq!(ids(&first.report.found), ids(&second.report.found));
    assert_eq!(ids(&first.report.missing), ids(&second.report.missing));

    // A lost tool scanned later is present again.
    reconciler
        .reconcile(yard.north.id, yard.worker.id, ["qr-drill", "qr-level"])
        .await
        .unwrap();
    let level = yard.app.registry.get_tool(yard.tools[2].id).await.unwrap();
    assert_eq!(level.status, ToolStatus::Present);

    let history = reconciler.history(yard.north.id).await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(history[0].performed_at >= history[2].performed_at);
}

#[tokio::test]
async fn test_unknown_site_or_user_is_not_found() {
    let (yard, _) = common::yard(TOOLS).await;
    let err = yard
        .app
        .reconciler
        .reconcile(tool_store::SiteId(404), yard.worker.id, ["qr-drill"])
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = yard
        .app
        .reconciler
        .reconcile(yard.north.id, tool_store::UserId(404), ["qr-drill"])
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::NotFound { .. }));

    // Nothing was written.
    let drill = yard.app.registry.get_tool(yard.tools[0].id).await.unwrap();
    assert_eq!(drill.status, ToolStatus::Present);
    assert!(yard.app.reconciler.history(yard.north.id).await.unwrap().is_empty());
}

/// Treats each photo as UTF-8 text listing payloads; `!` marks a corrupt photo
struct TextDecoder;

impl QrDecoder for TextDecoder {
    fn decode(&self, image: &[u8]) -> Result<Vec<String>, DecodeError> {
        let text = std::str::from_utf8(image)
            .map_err(|e| DecodeError::UnreadableImage(e.to_string()))?;
        if text == "!" {
            return Err(DecodeError::Decoder("corrupt".to_string()));
        }
        Ok(text.split_whitespace().map(str::to_string).collect())
    }
}

#[tokio::test]
async fn test_photo_batch_with_unreadable_images() {
    let (yard, _) = common::yard(TOOLS).await;
    let photos = vec![
        b"qr-drill qr-grinder".to_vec(),
        Vec::new(),
        b"!".to_vec(),
        vec![0xff, 0xfe],
        b"qr-drill".to_vec(),
    ];

    let outcome = yard
        .app
        .reconciler
        .reconcile_photos(yard.north.id, yard.worker.id, &photos, &TextDecoder)
        .await
        .unwrap();

    assert_eq!(outcome.empty_photos, 3);
    assert_eq!(outcome.report.found_count(), 2);
    assert_eq!(outcome.report.missing_count(), 1);
}

#[tokio::test]
async fn test_report_json_export() {
    let (yard, _) = common::yard(TOOLS).await;
    let outcome = yard
        .app
        .reconciler
        .reconcile(yard.north.id, yard.worker.id, ["qr-drill"])
        .await
        .unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&outcome.report.to_json_pretty().unwrap()).unwrap();
    assert_eq!(json["site_name"], "North");
    assert_eq!(json["found"].as_array().unwrap().len(), 1);
    assert_eq!(json["missing"][0]["status"], "lost");
}

#[tokio::test]
async fn test_site_without_tools_yields_empty_report() {
    let (yard, _) = common::yard(TOOLS).await;
    let outcome = yard
        .app
        .reconciler
        .reconcile(yard.south.id, yard.south_foreman.id, ["qr-drill"])
        .await
        .unwrap();

    assert_eq!(outcome.report.total, 0);
    assert_eq!(outcome.report.found_count(), 0);
    assert_eq!(outcome.report.missing_count(), 0);
    assert!(outcome.check.tool_ids.is_empty());
    assert_eq!(yard.app.reconciler.history(yard.south.id).await.unwrap().len(), 1);

    // Tools elsewhere are untouched.
    let drill = yard.app.registry.get_tool(yard.tools[0].id).await.unwrap();
    assert_eq!(drill.status, ToolStatus::Present);
}
