use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Source roots checked by the hygiene scan. Anything else in the working tree
// (build output, data fixtures, reference material) is left alone.
const SOURCE_ROOTS: [&str; 4] = ["cavi", "cli", "tests", "benches"];

const FORBIDDEN_WORDS: [&str; 14] = [
    "FIXED", "CORRECTED", "FIX", "FIXES", "NEW", "CHANGED", "CHANGES", "CHANGE", "MODIFIED",
    "MODIFIES", "MODIFY", "UPDATED", "UPDATES", "UPDATE",
];

/// The kind of rule a collector enforces; selects the matching policy and message.
#[derive(Clone, Copy)]
enum Rule {
    UnderscorePrefix,
    ForbiddenWords,
    StarsInComment,
    AllCapsComment,
    AllowDeadCode,
}

impl Rule {
    fn pattern(self) -> String {
        match self {
            Rule::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Rule::ForbiddenWords => format!(r"(//|/\*).*(?:{})", FORBIDDEN_WORDS.join("|")),
            Rule::StarsInComment => r"(//|/\*).*\*\*".to_string(),
            Rule::AllCapsComment => r"(//|/\*).*".to_string(),
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
        }
    }

    fn explanation(self) -> String {
        match self {
            Rule::UnderscorePrefix => "Underscore-prefixed names are not allowed in this project.\n   \
                 Either use the binding (removing the underscore) or remove it completely."
                .to_string(),
            Rule::ForbiddenWords => format!(
                "Comments containing any of {} are not allowed.\n   \
                 Remove them rather than commenting them out.",
                FORBIDDEN_WORDS.join(", ")
            ),
            Rule::StarsInComment => {
                "The '**' pattern is not allowed in regular comments (only in /// docs).".to_string()
            }
            Rule::AllCapsComment => {
                "Comments whose alphabetic characters are all uppercase are not allowed.".to_string()
            }
            Rule::AllowDeadCode => "#[allow(dead_code)] attributes are not allowed.\n   \
                 Either use the code or remove it completely."
                .to_string(),
        }
    }

    /// Whether a matched line is a real violation of this rule.
    fn is_violation(self, line: &str) -> bool {
        match self {
            Rule::UnderscorePrefix => !is_comment(line) && !underscore_only_in_strings(line),
            Rule::ForbiddenWords | Rule::AllowDeadCode => true,
            Rule::StarsInComment => !line.trim_start().starts_with("///"),
            Rule::AllCapsComment => {
                let alpha: Vec<char> = comment_text(line)
                    .map(|text| text.chars().filter(|c| c.is_alphabetic()).collect())
                    .unwrap_or_default();
                !alpha.is_empty() && alpha.iter().all(|c| c.is_uppercase())
            }
        }
    }
}

// Collects every violating line of one file so the error lists them all at once.
struct ViolationCollector {
    rule: Rule,
    violations: Vec<String>,
    file_path: PathBuf,
}

impl ViolationCollector {
    fn new(rule: Rule, file_path: &Path) -> Self {
        Self {
            rule,
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} hygiene violations in {}:\n",
            self.violations.len(),
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {}\n", self.rule.explanation()));

        Some(error_msg)
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();

        if self.rule.is_violation(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//") || trimmed.starts_with("/*")
}

// A crude quote split: odd segments are inside string literals.
fn underscore_only_in_strings(line: &str) -> bool {
    line.contains('"')
        && line
            .split('"')
            .enumerate()
            .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

fn comment_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("///") {
        Some(rest.trim())
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        Some(rest.trim())
    } else if let Some(idx) = line.find("/*") {
        let rest = &line[idx + 2..];
        Some(match rest.find("*/") {
            Some(end) => rest[..end].trim(),
            None => rest.trim(),
        })
    } else {
        None
    }
}

fn rust_sources() -> impl Iterator<Item = PathBuf> {
    SOURCE_ROOTS
        .into_iter()
        .filter(|root| Path::new(root).is_dir())
        .flat_map(|root| WalkDir::new(root).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
}

fn scan(rule: Rule) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(&rule.pattern())?;
    let mut searcher = Searcher::new();

    for path in rust_sources() {
        let mut collector = ViolationCollector::new(rule, &path);
        searcher.search_path(&matcher, &path, &mut collector)?;
        if let Some(error_message) = collector.check_and_get_error_message() {
            return Err(error_message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for root in SOURCE_ROOTS {
        println!("cargo:rerun-if-changed={root}");
    }

    check_build_script_lints();

    for rule in [
        Rule::UnderscorePrefix,
        Rule::ForbiddenWords,
        Rule::StarsInComment,
        Rule::AllCapsComment,
        Rule::AllowDeadCode,
    ] {
        if let Err(e) = scan(rule) {
            // `eprintln!` so the message shows up in cargo's output.
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

// Compiles this script on its own with the project's strict lints denied.
fn check_build_script_lints() {
    let output = std::process::Command::new("rustc")
        .args([
            "--edition",
            "2021",
            "-D",
            "unused_variables",
            "-D",
            "dead_code",
            "-D",
            "unused_imports",
            "--crate-type",
            "bin",
            "--error-format",
            "human",
            "--emit",
            "metadata",
            "-o",
        ])
        .arg(std::env::temp_dir().join("gsvb-build-lint.rmeta"))
        .arg("build.rs")
        .output();

    match output {
        Ok(output) if !output.status.success() => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let kind = if stderr.contains("unused variable") {
                Some("Unused variables")
            } else if stderr.contains("never used") {
                Some("Unused functions")
            } else if stderr.contains("unused import") {
                Some("Unused imports")
            } else {
                None
            };
            if let Some(kind) = kind {
                eprintln!("\n❌ ERROR: {kind} detected in build.rs!");
                eprintln!("{stderr}");
                std::process::exit(1);
            }
        }
        Ok(_) => {}
        Err(_) => {
            println!("cargo:warning=Could not lint build.rs with rustc");
        }
    }
}
