//! Multi-format ingestion through the CLI: docx and pdf extraction, bad
//! files reported without aborting the batch, glob filters, size limit.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ragdesk_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ragdesk"))
}

/// Minimal valid PDF with the text "annual water report".
/// Builds body then xref with correct byte offsets so pdf-extract can parse it.
fn minimal_pdf_with_phrase() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 47 >> stream\nBT /F1 12 Tf 100 700 Td (annual water report) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn minimal_docx_with_text(paragraphs: &[&str]) -> Vec<u8> {
    use std::io::Write;
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn setup_file_support_env(exclude_globs: &[&str], max_file_size_mb: u64) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("files")).unwrap();

    let excludes = exclude_globs
        .iter()
        .map(|g| format!("\"{}\"", g))
        .collect::<Vec<_>>()
        .join(", ");

    let config_content = format!(
        r#"[index]
dir = "{}/data/index"

[chunking]
chunk_size = 300
chunk_overlap = 30

[generation]
provider = "stub"

[logging]
level = "error"

[ingest]
exclude_globs = [{}]
max_file_size_mb = {}
"#,
        root.display(),
        excludes,
        max_file_size_mb
    );

    fs::write(root.join("config").join("ragdesk.toml"), config_content).unwrap();
    fs::write(
        root.join("files").join("readme.md"),
        "# Readme\n\nPlain text file for tests.\n",
    )
    .unwrap();

    (tmp, root.join("config").join("ragdesk.toml"))
}

fn run_ragdesk(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(ragdesk_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ragdesk: {}", e));
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn ingest_files(tmp: &TempDir, config_path: &Path) -> String {
    let files = tmp.path().join("files");
    let (stdout, stderr, success) = run_ragdesk(config_path, &["ingest", files.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    stdout
}

#[test]
fn test_docx_ingest_and_search() {
    let (tmp, config_path) = setup_file_support_env(&[], 50);
    fs::write(
        tmp.path().join("files").join("policy.docx"),
        minimal_docx_with_text(&["Travel policy", "Trains are preferred over short flights."]),
    )
    .unwrap();

    let stdout = ingest_files(&tmp, &config_path);
    assert!(stdout.contains("Ingested 2 documents"), "{}", stdout);

    let (search_out, _, success) =
        run_ragdesk(&config_path, &["search", "trains flights", "--lexical"]);
    assert!(success);
    let first = search_out.lines().next().unwrap();
    assert!(first.contains("policy.docx"), "{}", search_out);
    assert!(search_out.contains("Travel policy Trains are preferred"));
}

#[test]
fn test_pdf_ingest_does_not_abort_batch() {
    let (tmp, config_path) = setup_file_support_env(&[], 50);
    fs::write(tmp.path().join("files").join("water.pdf"), minimal_pdf_with_phrase()).unwrap();

    let stdout = ingest_files(&tmp, &config_path);
    let (docs, _, _) = run_ragdesk(&config_path, &["documents"]);
    assert!(docs.contains("readme.md"));
    if docs.contains("water.pdf") {
        let (search_out, _, _) = run_ragdesk(&config_path, &["search", "annual water report"]);
        assert!(search_out.contains("water.pdf"), "{}", search_out);
    } else {
        assert!(stdout.contains("1 failed"), "{}", stdout);
    }
}

#[test]
fn test_corrupt_files_reported_and_skipped() {
    let (tmp, config_path) = setup_file_support_env(&[], 50);
    let files = tmp.path().join("files");
    fs::write(files.join("bad.pdf"), b"not a valid pdf").unwrap();
    fs::write(files.join("bad.docx"), b"not a zip archive").unwrap();
    fs::write(files.join("good.md"), "# Good\n\nThis is good.\n").unwrap();

    let stdout = ingest_files(&tmp, &config_path);
    assert!(
        stdout.contains("Ingested 2 documents"),
        "good.md and readme.md should be ingested: {}",
        stdout
    );
    assert!(stdout.contains("2 failed"), "{}", stdout);
    assert!(stdout.contains("bad.pdf"));
    assert!(stdout.contains("bad.docx"));
}

#[test]
fn test_exclude_globs_respected() {
    let (tmp, config_path) = setup_file_support_env(&["drafts/**"], 50);
    let drafts = tmp.path().join("files").join("drafts");
    fs::create_dir_all(&drafts).unwrap();
    fs::write(drafts.join("wip.md"), "# Draft\n\nNot ready.\n").unwrap();

    let stdout = ingest_files(&tmp, &config_path);
    assert!(stdout.contains("Ingested 1 documents"), "{}", stdout);
    assert!(!stdout.contains("wip.md"));
}

#[test]
fn test_max_size_skipped() {
    let (tmp, config_path) = setup_file_support_env(&[], 1);
    let files = tmp.path().join("files");
    fs::write(files.join("big.txt"), "a ".repeat(600 * 1024)).unwrap();
    fs::write(files.join("small.md"), "# Small\n\nOk.\n").unwrap();

    let stdout = ingest_files(&tmp, &config_path);
    assert!(stdout.contains("Ingested 2 documents"), "{}", stdout);
    assert!(stdout.contains("1 failed"), "{}", stdout);
    assert!(stdout.contains("big.txt"));
    assert!(stdout.contains("byte limit"));
}
