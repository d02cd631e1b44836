//! The `mocktest init` command.

use std::path::Path;

use anyhow::Result;

pub fn execute() -> Result<()> {
    if Path::new("mocktest.toml").exists() {
        println!("mocktest.toml already exists, skipping.");
    } else {
        std::fs::write("mocktest.toml", SAMPLE_CONFIG)?;
        println!("Created mocktest.toml");
    }

    std::fs::create_dir_all("exams")?;
    let example_path = Path::new("exams/example.toml");
    if example_path.exists() {
        println!("exams/example.toml already exists, skipping.");
    } else {
        std::fs::write(example_path, EXAMPLE_EXAM)?;
        println!("Created exams/example.toml");
    }

    println!("\nNext steps:");
    println!("  1. Run: mocktest validate --exam exams/example.toml");
    println!("  2. Run: mocktest take --exam example");
    println!("  3. Point [api] at your exam service when you have one");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# mocktest configuration

# Where the in-progress session is kept between runs.
storage_dir = "./.mocktest"

# Pass mark used by `mocktest score` when --passing is not given.
passing_percent = 40

# Window for coalescing session writes, in milliseconds.
debounce_ms = 500

[api]
type = "local"
exam_dir = "./exams"

# [api]
# type = "http"
# base_url = "https://exams.example.com"
# token = "${MOCKTEST_API_TOKEN}"
# timeout_secs = 30
"#;

const EXAMPLE_EXAM: &str = r#"[exam]
id = "example"
title = "Example Exam"
description = "A short exam to get started"
duration_minutes = 5
passing_percent = 40

[[questions]]
id = "capital-france"
text = "What is the capital of France?"
options = ["Berlin", "Paris", "Madrid", "Rome"]
correct = "B"
explanation = "Paris has been the capital since 987."

[[questions]]
id = "boiling-point"
text = "At sea level, water boils at how many degrees Celsius?"
options = ["90", "100", "110", "120"]
correct = "B"

[[questions]]
id = "largest-planet"
text = "Which is the largest planet in the solar system?"
options = ["Earth", "Saturn", "Jupiter", "Neptune"]
correct = "C"
"#;
