use crate::directory;
use crate::promotion;
use crate::report_card;
use anyhow::Context;
use rusqlite::Connection;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const REPORT_CARDS_ENTRY: &str = "report_cards.json";
const PROMOTIONS_ENTRY: &str = "promotions.csv";
pub const ARCHIVE_FORMAT_V1: &str = "gradebook-term-archive-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub archive_format: String,
    pub report_card_count: usize,
    pub promotion_count: usize,
}

fn csv_quote(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Bundle every stored report card and promotion record of a term into one zip.
pub fn export_term_archive(
    conn: &Connection,
    term_id: &str,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let term_name = directory::ensure_term_exists(conn, term_id)?;
    let cards = report_card::list_term_reports(conn, term_id)?;
    let records = promotion::list_promotion_records(conn, term_id, None)?;

    let cards_json =
        serde_json::to_vec_pretty(&cards).context("failed to serialize report cards")?;

    let mut promotions_csv = String::from(
        "student_id,student_name,from_class_id,to_class_id,action,reason,processed_at\n",
    );
    for r in &records {
        let line = [
            r.student_id.as_str(),
            r.student_name.as_str(),
            r.from_class_id.as_str(),
            r.to_class_id.as_str(),
            r.action.as_str(),
            r.reason.as_str(),
            r.processed_at.as_str(),
        ]
        .iter()
        .map(|v| csv_quote(v))
        .collect::<Vec<_>>()
        .join(",");
        promotions_csv.push_str(&line);
        promotions_csv.push('\n');
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = serde_json::Map::new();
    entries.insert(
        REPORT_CARDS_ENTRY.to_string(),
        json!({ "sha256": sha256_hex(&cards_json), "count": cards.len() }),
    );
    entries.insert(
        PROMOTIONS_ENTRY.to_string(),
        json!({ "sha256": sha256_hex(promotions_csv.as_bytes()), "count": records.len() }),
    );
    let manifest = json!({
        "format": ARCHIVE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "termId": term_id,
        "termName": term_name,
        "exportedAt": crate::db::now_rfc3339(),
        "entries": entries,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(REPORT_CARDS_ENTRY, opts)
        .context("failed to start report cards entry")?;
    zip.write_all(&cards_json)
        .context("failed to write report cards entry")?;

    zip.start_file(PROMOTIONS_ENTRY, opts)
        .context("failed to start promotions entry")?;
    zip.write_all(promotions_csv.as_bytes())
        .context("failed to write promotions entry")?;

    zip.finish().context("failed to finalize zip archive")?;

    tracing::info!(
        term_id,
        report_cards = cards.len(),
        promotions = records.len(),
        path = %out_path.to_string_lossy(),
        "term archive exported"
    );
    Ok(ExportSummary {
        archive_format: ARCHIVE_FORMAT_V1.to_string(),
        report_card_count: cards.len(),
        promotion_count: records.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::directory::{create_class, create_student, create_term, upsert_result};
    use crate::grading::{create_scale, GradingScaleInput};
    use crate::promotion::{process_promotions, PromotionAction, PromotionDecision};
    use std::io::Read;
    use zip::ZipArchive;

    #[test]
    fn csv_quoting() {
        assert_eq!(csv_quote("plain"), "plain");
        assert_eq!(csv_quote("a,b"), "\"a,b\"");
        assert_eq!(csv_quote("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn archive_contains_cards_promotions_and_checksums() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = db::open_db(dir.path()).expect("open");
        create_scale(
            &conn,
            &GradingScaleInput {
                grade: "P".to_string(),
                min_score: 0.0,
                max_score: 100.0,
                gpa_point: 1.0,
                remark: "Pass".to_string(),
            },
        )
        .expect("scale");
        let class_id = create_class(&conn, "JSS 3").expect("class").id;
        let next = create_class(&conn, "SS 1").expect("next").id;
        let term_id = create_term(&conn, "Third Term", None, true).expect("term").id;
        let sid = create_student(&conn, &class_id, "Ngozi", "Okafor, Jr", None)
            .expect("student")
            .id;
        upsert_result(&conn, &sid, &term_id, "math", 77.0, None).expect("result");
        report_card::generate_class_reports(&conn, &class_id, &term_id).expect("reports");
        process_promotions(
            &conn,
            &[PromotionDecision {
                student_id: sid.clone(),
                action: PromotionAction::Promote,
                target_class_id: Some(next),
                reason: None,
            }],
            &term_id,
            None,
        )
        .expect("promote");

        let out = dir.path().join("exports").join("term.zip");
        let summary = export_term_archive(&conn, &term_id, &out).expect("export");
        assert_eq!(summary.report_card_count, 1);
        assert_eq!(summary.promotion_count, 1);

        let mut archive = ZipArchive::new(File::open(&out).expect("open zip")).expect("zip");
        let mut manifest = String::new();
        archive
            .by_name(MANIFEST_ENTRY)
            .expect("manifest")
            .read_to_string(&mut manifest)
            .expect("read manifest");
        let manifest: serde_json::Value = serde_json::from_str(&manifest).expect("json");
        assert_eq!(manifest["format"], ARCHIVE_FORMAT_V1);

        let mut csv = String::new();
        archive
            .by_name(PROMOTIONS_ENTRY)
            .expect("promotions")
            .read_to_string(&mut csv)
            .expect("read csv");
        assert_eq!(
            manifest["entries"][PROMOTIONS_ENTRY]["sha256"],
            sha256_hex(csv.as_bytes())
        );
        assert!(csv.contains("\"Ngozi Okafor, Jr\""));
        assert!(csv.contains(",PROMOTE,"));

        let mut cards = String::new();
        archive
            .by_name(REPORT_CARDS_ENTRY)
            .expect("cards")
            .read_to_string(&mut cards)
            .expect("read cards");
        let cards: serde_json::Value = serde_json::from_str(&cards).expect("cards json");
        assert_eq!(cards[0]["averageScore"], 77.0);
        assert_eq!(cards[0]["results"][0]["grade"], "P");
    }
}
