//! Integration tests for the acceptability-eval CLI and library.
//!
//! - Full runs of both modes against an in-process model
//! - Output table layout and contents
//! - CLI subcommands via the built binary

#![allow(clippy::unwrap_used)]
#![allow(clippy::float_cmp)]

use acceptability_eval::results::{partial_path, read_prompt_records, read_sentence_surprisals};
use acceptability_eval::{
    run, EvalError, EvalMode, LanguageModel, ModelError, RunConfig, SentenceSurprisal, Settings,
    DEFAULT_PROMPT,
};
use std::cell::RefCell;
use std::path::Path;
use std::process::Command;

const BIN: &str = env!("CARGO_BIN_EXE_acceptability-eval");

const PAIRS_CSV: &str = "\
phenomenon,test_item,original_condition,sentence_grammatical,sentence_ungrammatical
agreement,item 1,singular,The cat sleeps,The cat sleep
agreement,item 2,plural,The cats sleep,
islands,item 1,wh,,
";

const STIMULI_CSV: &str = "\
phenomenon,test_item,condition,sentence
agreement,item 1,grammatical,The cat sleeps
agreement,item 1,ungrammatical,The cat sleep
";

/// Surprisal = word length; answers `N` when the prompt mentions "sleep.".
struct ScriptedModel {
    id: &'static str,
    prompts: RefCell<Vec<String>>,
    fail_on: Option<&'static str>,
}

impl ScriptedModel {
    fn new(id: &'static str) -> Self {
        Self {
            id,
            prompts: RefCell::new(Vec::new()),
            fail_on: None,
        }
    }
}

impl LanguageModel for ScriptedModel {
    fn model_id(&self) -> &str {
        self.id
    }

    #[allow(clippy::cast_precision_loss)]
    fn sentence_surprisal(&self, sentence: &str) -> Result<SentenceSurprisal, ModelError> {
        if self.fail_on == Some(sentence) {
            return Err(ModelError::ModelUnavailable("connection reset".to_string()));
        }
        Ok(SentenceSurprisal::from_pairs(
            sentence.split_whitespace().map(|w| (w, w.len() as f64)),
        ))
    }

    fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        self.prompts.borrow_mut().push(prompt.to_string());
        Ok(if prompt.contains("sleep.\"") { "N" } else { "C" }.to_string())
    }
}

fn run_config(input: &Path, output: &Path, model: &str, mode: EvalMode) -> RunConfig {
    RunConfig {
        input: input.to_path_buf(),
        output_root: output.to_path_buf(),
        model_id: model.to_string(),
        mode,
        settings: Settings::default(),
    }
}

// ============================================================================
// Library runs
// ============================================================================

#[test]
fn test_minimal_pairs_run_writes_both_tables() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("pairs.csv");
    std::fs::write(&input, PAIRS_CSV).unwrap();
    let out = dir.path().join("outputs");

    let model = ScriptedModel::new("openai-community/GPT2");
    let summary = run(
        &run_config(&input, &out, model.model_id(), EvalMode::MinimalPairs),
        &model,
    )
    .unwrap();

    let sentence_path = out.join("minimal_pairs/sentence_surprisals/gpt2.csv");
    let token_path = out.join("minimal_pairs/token_surprisals/gpt2.csv");
    assert_eq!(summary.rows, 3);
    assert_eq!(summary.written, vec![sentence_path.clone(), token_path.clone()]);
    assert!(!partial_path(&sentence_path).exists());

    let rows = read_sentence_surprisals(&sentence_path).unwrap();
    assert_eq!(rows.len(), 3);
    // The(3) + cat(3) + sleeps(6)
    assert_eq!(rows[0].sum_surprisal_grammatical, Some(12.0));
    assert_eq!(rows[0].sum_surprisal_ungrammatical, Some(11.0));
    assert_eq!(rows[1].sum_surprisal_grammatical, Some(12.0));
    assert!(rows[1].sum_surprisal_ungrammatical.is_none());
    assert!(rows[1].sentence_ungrammatical.is_none());
    assert_eq!(rows[2].phenomenon, "islands");
    assert!(rows[2].sum_surprisal_grammatical.is_none());

    let tokens = std::fs::read_to_string(&token_path).unwrap();
    let mut lines = tokens.lines();
    assert_eq!(
        lines.next().unwrap(),
        "token,surprisal,token_id,model,condition,phenomenon,test_item,original_condition"
    );
    assert_eq!(
        lines.next().unwrap(),
        "The,3.0,0,openai-community/GPT2,grammatical,agreement,item 1,singular"
    );
    // 3 + 3 + 3 scored tokens across the two pairs.
    assert_eq!(tokens.lines().count(), 1 + 9);
}

#[test]
fn test_minimal_pairs_failure_leaves_only_partial() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("pairs.csv");
    std::fs::write(&input, PAIRS_CSV).unwrap();
    let out = dir.path().join("outputs");

    let mut model = ScriptedModel::new("gpt2");
    model.fail_on = Some("The cats sleep");
    let err = run(&run_config(&input, &out, "gpt2", EvalMode::MinimalPairs), &model).unwrap_err();
    assert!(matches!(err, EvalError::Model { row: 2, .. }));

    let sentence_path = out.join("minimal_pairs/sentence_surprisals/gpt2.csv");
    assert!(!sentence_path.exists());
    assert!(!out.join("minimal_pairs/token_surprisals/gpt2.csv").exists());

    let partial = std::fs::read_to_string(partial_path(&sentence_path)).unwrap();
    // Header plus the one row finished before the failure.
    assert_eq!(partial.lines().count(), 2);
}

#[test]
fn test_prompting_run_writes_filled_prompts() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("stimuli.csv");
    std::fs::write(&input, STIMULI_CSV).unwrap();
    let out = dir.path().join("outputs");

    let model = ScriptedModel::new("text-davinci-002");
    let summary = run(
        &run_config(&input, &out, "text-davinci-002", EvalMode::Prompting),
        &model,
    )
    .unwrap();

    let path = out.join("original/text-davinci-002.csv");
    assert_eq!(summary.written, vec![path.clone()]);

    let records = read_prompt_records(&path).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].response, "C");
    assert_eq!(records[1].response, "N");
    assert_eq!(
        records[0].prompt,
        DEFAULT_PROMPT.replace("[SENTENCE]", "\"The cat sleeps.\"")
    );
    assert_eq!(*model.prompts.borrow(), vec![
        records[0].prompt.clone(),
        records[1].prompt.clone()
    ]);
}

#[test]
fn test_prompting_custom_template() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("stimuli.csv");
    std::fs::write(&input, STIMULI_CSV).unwrap();

    let mut config = run_config(&input, dir.path(), "m", EvalMode::Prompting);
    config.settings = Settings::from_yaml("prompt_template: \"Judge: [SENTENCE]\"\n").unwrap();

    let model = ScriptedModel::new("m");
    run(&config, &model).unwrap();
    assert_eq!(model.prompts.borrow()[0], "Judge: \"The cat sleeps.\"");
}

#[test]
fn test_malformed_input_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("stimuli.csv");
    std::fs::write(&input, "phenomenon,test_item\nagreement,item 1\n").unwrap();

    let model = ScriptedModel::new("m");
    let err = run(&run_config(&input, dir.path(), "m", EvalMode::Prompting), &model).unwrap_err();
    assert!(matches!(err, EvalError::Stimulus(_)));
    assert!(model.prompts.borrow().is_empty());
}

#[test]
fn test_minimal_pairs_missing_sentence_column_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("pairs.csv");
    std::fs::write(
        &input,
        "phenomenon,test_item,original_condition,sentence_grammatical\nA,item 1,X,The cat sat\n",
    )
    .unwrap();
    let out = dir.path().join("outputs");

    let model = ScriptedModel::new("gpt2");
    let err = run(&run_config(&input, &out, "gpt2", EvalMode::MinimalPairs), &model).unwrap_err();
    assert!(matches!(err, EvalError::Stimulus(_)));
    assert!(err.to_string().contains("sentence_ungrammatical"));
    assert!(!out.exists());
}

#[test]
fn test_minimal_pairs_blank_sentence_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("pairs.csv");
    std::fs::write(
        &input,
        "phenomenon,test_item,original_condition,sentence_grammatical,sentence_ungrammatical\nA,item 1,X, ,The cat sat\n",
    )
    .unwrap();

    let model = ScriptedModel::new("gpt2");
    run(&run_config(&input, dir.path(), "gpt2", EvalMode::MinimalPairs), &model).unwrap();

    let rows =
        read_sentence_surprisals(&dir.path().join("minimal_pairs/sentence_surprisals/gpt2.csv"))
            .unwrap();
    assert!(rows[0].sum_surprisal_grammatical.is_none());
    assert_eq!(rows[0].sum_surprisal_ungrammatical, Some(9.0));
}

#[test]
fn test_output_tables_keep_only_documented_columns() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("stimuli.csv");
    std::fs::write(
        &input,
        "phenomenon,test_item,condition,sentence,source\nagreement,item 1,grammatical,The cat sleeps,web\n",
    )
    .unwrap();

    let model = ScriptedModel::new("m");
    run(&run_config(&input, dir.path(), "m", EvalMode::Prompting), &model).unwrap();

    let text = std::fs::read_to_string(dir.path().join("original/m.csv")).unwrap();
    assert_eq!(
        text.lines().next().unwrap(),
        "phenomenon,test_item,condition,sentence,prompt,response"
    );
}

// ============================================================================
// CLI
// ============================================================================

#[test]
fn test_cli_help_lists_subcommands() {
    let output = Command::new(BIN).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("evaluate"));
    assert!(stdout.contains("extract"));
    assert!(stdout.contains("summarize"));
}

#[test]
fn test_cli_evaluate_help_states_local_model_family() {
    let output = Command::new(BIN)
        .args(["evaluate", "--help"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Llama-family"));
}

#[test]
fn test_cli_extract_dedupes_and_sorts() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw.csv");
    std::fs::write(
        &raw,
        "\
participant,phenomenon,test_item,condition,sentence,rating
p1,b,item 10,g,Ten,5
p1,b,item 2,g,Two,4
p2,b,item 10,g,Ten,3
p1,a,item 1,g,One,7
",
    )
    .unwrap();
    let out = dir.path().join("stimuli").join("stimuli.csv");

    let output = Command::new(BIN)
        .args(["extract", "-i"])
        .arg(&raw)
        .arg("-o")
        .arg(&out)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let text = std::fs::read_to_string(&out).unwrap();
    assert_eq!(
        text,
        "phenomenon,test_item,condition,sentence\na,item 1,g,One\nb,item 2,g,Two\nb,item 10,g,Ten\n"
    );
}

#[test]
fn test_cli_extract_conflict_fails() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw.csv");
    std::fs::write(
        &raw,
        "phenomenon,test_item,condition,sentence\na,item 1,g,One\na,item 1,g,Uno\n",
    )
    .unwrap();

    let output = Command::new(BIN)
        .args(["extract", "-i"])
        .arg(&raw)
        .arg("-o")
        .arg(dir.path().join("out.csv"))
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Conflicting sentences"));
}

#[test]
fn test_cli_summarize_minimal_pairs_json() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("pairs.csv");
    std::fs::write(&input, PAIRS_CSV).unwrap();
    let model = ScriptedModel::new("gpt2");
    run(&run_config(&input, dir.path(), "gpt2", EvalMode::MinimalPairs), &model).unwrap();

    let table = dir.path().join("minimal_pairs/sentence_surprisals/gpt2.csv");
    let output = Command::new(BIN)
        .args(["summarize", "--format", "json", "--bootstrap", "200", "-i"])
        .arg(&table)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let agreement = &value["minimal_pairs"][0];
    assert_eq!(agreement["phenomenon"], "agreement");
    assert_eq!(agreement["pairs"], 1);
    assert_eq!(agreement["incomplete"], 1);
    // 12 vs 11: the ungrammatical sentence is less surprising.
    assert_eq!(agreement["accuracy"], 0.0);
    assert_eq!(value["minimal_pairs"][1]["phenomenon"], "islands");
}

#[cfg(not(feature = "local-inference"))]
#[test]
fn test_cli_local_backend_requires_feature() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("pairs.csv");
    std::fs::write(&input, PAIRS_CSV).unwrap();

    let output = Command::new(BIN)
        .args(["evaluate", "--model", "gpt2", "--model-type", "local", "--eval-mode", "minimal_pairs", "-i"])
        .arg(&input)
        .arg("-o")
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("local-inference"));
}
