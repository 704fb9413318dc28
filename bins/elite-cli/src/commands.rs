// CLI commands for operating Elite
use anyhow::{anyhow, bail, Context, Result};
use elite_common::broker::{BrokerError, BrokerManager, GLOBAL_BROKER};
use elite_common::config::BrokerConfig;
use elite_common::normalize::normalize;
use elite_common::redis::RedisBroker;
use elite_common::submission::Submission;
use elite_common::types::{ExecutionResult, Job, Language};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageEntry>,
}

#[derive(Debug, Deserialize)]
struct LanguageEntry {
    name: String,
    version: String,
    toolchain: ToolchainEntry,
}

#[derive(Debug, Deserialize)]
struct ToolchainEntry {
    source_file: String,
    #[serde(default)]
    compile: Option<Vec<String>>,
    run: Vec<String>,
}

/// One checked entry of languages.json
#[derive(Debug)]
pub struct ConfigRow {
    pub language: String,
    pub version: String,
    pub compiled: bool,
    /// Programs the toolchain invokes, and whether each was found
    pub tools: Vec<(String, bool)>,
}

#[derive(Debug, Default)]
pub struct ConfigReport {
    pub rows: Vec<ConfigRow>,
    pub problems: Vec<String>,
}

/// Read a file, or stdin for "-"
fn read_input(file: &str) -> Result<String> {
    if file == "-" {
        io::read_to_string(io::stdin()).context("Failed to read stdin")
    } else {
        fs::read_to_string(file).with_context(|| format!("Failed to read {}", file))
    }
}

/// Normalize raw test-case text and print the canonical cases
pub fn normalize_file(file: &str) -> Result<()> {
    let raw = read_input(file)?;

    match normalize(&raw) {
        Ok(normalized) => {
            for diagnostic in &normalized.diagnostics {
                eprintln!("⚠️  Skipped {}", diagnostic);
            }
            let json = serde_json::to_string_pretty(&normalized.cases).context("Failed to serialize test cases")?;
            println!("{}", json);
            eprintln!(
                "✅ {} test case(s) via {:?} stage",
                normalized.cases.len(),
                normalized.stage
            );
            Ok(())
        }
        Err(e) => bail!("Normalization failed: {}", e),
    }
}

/// Load a job file into a queue envelope. Job files use the client
/// submission format and get the same validation.
pub fn load_job(path: &Path) -> Result<Job> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Submission::parse(&content)
        .and_then(Submission::into_job)
        .map_err(|e| anyhow!("Invalid job file {}: {}", path.display(), e.message))
}

/// Queue a job through the shared broker and print its verdict
pub async fn submit_job(file: &Path, redis_url: Option<String>, timeout_secs: Option<u64>) -> Result<()> {
    let broker_config = BrokerConfig::from_env();
    let redis_url = redis_url.unwrap_or(broker_config.redis_url);
    let timeout = timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(broker_config.round_trip_timeout);

    let job = load_job(file)?;
    println!(
        "🚀 Submitting {} job with {} test case(s)...",
        job.language,
        job.test_case.len()
    );

    let manager = GLOBAL_BROKER
        .get_or_init(|| async {
            let backend = RedisBroker::connect_with_subscriber(&redis_url).await?;
            Ok::<_, BrokerError>(BrokerManager::new(Arc::new(backend), timeout))
        })
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", redis_url))?;

    let outcome = manager.submit(job).await;
    GLOBAL_BROKER.shutdown().await;

    let raw = outcome.context("Job did not complete")?;
    let result = raw.parse().context("Worker returned an unreadable result")?;
    print_result(&result);

    if let Some(error) = &result.error {
        bail!("System error ({}): {}", error.kind.as_str(), error.message);
    }
    Ok(())
}

fn print_result(result: &ExecutionResult) {
    println!("\n📋 Job {}", result.job_id);
    if let Some(verdict) = result.verdict {
        println!("Verdict: {:?}", verdict);
    }
    if result.compilation_error {
        println!("\n❌ Compilation failed:");
        println!("{}", result.stderr.as_deref().unwrap_or(""));
        return;
    }

    for (idx, test) in result.results.iter().enumerate() {
        let mark = if test.passed { "✅" } else { "❌" };
        println!(
            "  {} Test {:<3} {:>6} ms  {:?}",
            mark,
            idx + 1,
            test.execution_time_ms,
            test.failure
        );
        if !test.passed {
            println!("       expected: {}", test.expected);
            println!("       actual:   {}", test.actual);
        }
    }

    if let Some(generated) = &result.generated_results {
        println!("\n📝 Generated {} expected output(s)", generated.len());
    }
    if result.all_passed {
        println!("\n✅ All test cases passed");
    }
}

/// Whether `program` resolves to a file, directly or through PATH
pub fn find_on_path(program: &str) -> bool {
    if program.contains('/') {
        return Path::new(program).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

/// Check languages.json content without touching the filesystem beyond PATH lookups
pub fn inspect_config(content: &str) -> Result<ConfigReport> {
    let languages_json: LanguagesJson = serde_json::from_str(content).context("Failed to parse languages.json")?;
    let mut report = ConfigReport::default();
    let mut seen = HashSet::new();

    for entry in languages_json.languages {
        let language = match entry.name.parse::<Language>() {
            Ok(language) => language,
            Err(e) => {
                report.problems.push(e.to_string());
                continue;
            }
        };
        if !seen.insert(language) {
            report.problems.push(format!("Language configured twice: {}", language));
        }
        if entry.toolchain.source_file.trim().is_empty() {
            report.problems.push(format!("{}: source_file is empty", language));
        }
        if entry.toolchain.run.is_empty() {
            report.problems.push(format!("{}: run command is empty", language));
        }
        if language.is_compiled() != entry.toolchain.compile.is_some() {
            report.problems.push(format!(
                "{}: compile step {} for a {} language",
                language,
                if entry.toolchain.compile.is_some() { "present" } else { "missing" },
                if language.is_compiled() { "compiled" } else { "interpreted" }
            ));
        }

        // Placeholders are produced by the compile step, not installed tools
        let tools = entry
            .toolchain
            .compile
            .iter()
            .chain(std::iter::once(&entry.toolchain.run))
            .filter_map(|argv| argv.first())
            .filter(|program| !program.starts_with('{'))
            .map(|program| (program.clone(), find_on_path(program)))
            .collect();

        report.rows.push(ConfigRow {
            language: language.to_string(),
            version: entry.version,
            compiled: entry.toolchain.compile.is_some(),
            tools,
        });
    }

    for language in Language::ALL {
        if !seen.contains(&language) {
            report.problems.push(format!("Language not configured: {}", language));
        }
    }

    Ok(report)
}

/// Validate languages.json and report which toolchains are installed
pub fn check_config(path: &Path) -> Result<()> {
    println!("🔍 Checking {}...", path.display());
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let report = inspect_config(&content)?;

    println!("\n{:<10} {:<10} {:<10} {:<30}", "LANGUAGE", "VERSION", "COMPILED", "TOOLS");
    println!("{}", "─".repeat(64));
    for row in &report.rows {
        let tools: Vec<String> = row
            .tools
            .iter()
            .map(|(tool, found)| format!("{}{}", tool, if *found { "" } else { " (missing)" }))
            .collect();
        println!(
            "{:<10} {:<10} {:<10} {:<30}",
            row.language,
            row.version,
            if row.compiled { "yes" } else { "no" },
            tools.join(", ")
        );
    }

    let missing_tools = report
        .rows
        .iter()
        .flat_map(|row| row.tools.iter())
        .filter(|(_, found)| !found)
        .count();
    if missing_tools > 0 {
        println!("\n⚠️  {} tool(s) not found on PATH on this machine", missing_tools);
    }

    if !report.problems.is_empty() {
        for problem in &report.problems {
            println!("❌ {}", problem);
        }
        bail!("{} problem(s) in {}", report.problems.len(), path.display());
    }

    println!("\n✅ Configuration is valid: {} language(s)", report.rows.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use elite_common::types::{Mode, DEFAULT_TIMEOUT_MS};
    use std::io::Write;

    fn job_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn bundled_config() -> String {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/languages.json");
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_bundled_config_is_valid() {
        let report = inspect_config(&bundled_config()).unwrap();
        assert!(report.problems.is_empty(), "{:?}", report.problems);
        assert_eq!(report.rows.len(), 4);

        let cpp = report.rows.iter().find(|row| row.language == "C++").unwrap();
        assert!(cpp.compiled);
        // "{bin}" is not an installed tool
        assert_eq!(cpp.tools.len(), 1);
        assert_eq!(cpp.tools[0].0, "g++");
    }

    #[test]
    fn test_config_problems_are_collected() {
        let content = r#"{"languages": [
            {"name": "Python", "version": "3", "toolchain": {"source_file": "main.py", "run": ["python3", "{src}"]}},
            {"name": "py", "version": "3", "toolchain": {"source_file": "main.py", "run": ["python3", "{src}"]}},
            {"name": "Rust", "version": "1", "toolchain": {"source_file": "main.rs", "run": ["{bin}"]}},
            {"name": "Go", "version": "1", "toolchain": {"source_file": "main.go", "run": ["go", "run"]}}
        ]}"#;
        let report = inspect_config(content).unwrap();
        let problems = report.problems.join("\n");
        assert!(problems.contains("configured twice: Python"), "{}", problems);
        assert!(problems.contains("Rust: compile step missing"), "{}", problems);
        assert!(problems.contains("Go"), "{}", problems);
        assert!(problems.contains("not configured: C++"), "{}", problems);
        assert!(problems.contains("not configured: Java"), "{}", problems);
    }

    #[test]
    fn test_find_on_path() {
        assert!(find_on_path("sh"));
        assert!(!find_on_path("definitely-not-a-tool-xyz"));
        assert!(!find_on_path("/no/such/dir/tool"));
    }

    #[test]
    fn test_load_job_file() {
        let file = job_file(
            r#"{"code": "print(1)", "language": "Python", "testCase": [{"input": [], "expected": "1"}], "timeout": 50000}"#,
        );
        let job = load_job(file.path()).unwrap();
        assert_eq!(job.language, "Python");
        assert_eq!(job.timeout, 10_000);
        assert_eq!(job.mode, Mode::Run);
        assert!(job.job_id.is_empty());
    }

    #[test]
    fn test_job_file_matches_client_submission_rules() {
        // Legacy field names and defaults as accepted over the WebSocket
        let file = job_file(
            r#"{"job_id": " ", "editorCode": "x", "selectedLanguage": " cpp ", "testCases": [{"input": [], "expected": ""}]}"#,
        );
        let job = load_job(file.path()).unwrap();
        assert_eq!(job.language, "cpp");
        assert_eq!(job.timeout, DEFAULT_TIMEOUT_MS);
        assert!(job.job_id.is_empty());
    }

    #[test]
    fn test_invalid_job_files_are_rejected() {
        let no_cases = job_file(r#"{"code": "x", "language": "Rust", "testCase": []}"#);
        let err = load_job(no_cases.path()).unwrap_err().to_string();
        assert!(err.contains("At least one test case is required"), "{}", err);

        let blank_code = job_file(r#"{"code": " ", "language": "Rust", "testCase": [{"input": [], "expected": ""}]}"#);
        let err = load_job(blank_code.path()).unwrap_err().to_string();
        assert!(err.contains("Source code is empty"), "{}", err);

        let garbage = job_file("{not json");
        let err = load_job(garbage.path()).unwrap_err().to_string();
        assert!(err.contains("Malformed submission"), "{}", err);
    }

    #[test]
    fn test_read_input_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[{{\"input\": [\"1\"], \"expected\": \"1\"}}]").unwrap();
        let text = read_input(file.path().to_str().unwrap()).unwrap();
        assert!(text.contains("expected"));
        assert!(normalize_file(file.path().to_str().unwrap()).is_ok());
    }
}
