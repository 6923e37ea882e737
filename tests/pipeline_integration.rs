use async_trait::async_trait;
use property_nlq::config::Config;
use property_nlq::error::{
    ExtractionError, GeneratorError, Rejection, TranslationError, ValidationError,
};
use property_nlq::generator::Generator;
use property_nlq::models::ParamValue;
use property_nlq::pipeline::TranslationPipeline;
use property_nlq::prompts::PromptBook;
use property_nlq::repository::InMemoryPropertyRepository;
use property_nlq::search::{SearchError, SearchService};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Generator that replays a fixed script and counts calls.
struct ScriptedGenerator {
    answers: Mutex<VecDeque<Result<String, GeneratorError>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    fn new(answers: Vec<Result<String, GeneratorError>>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Answers every call with `answer`.
    fn repeating(answer: &str, times: usize) -> Arc<Self> {
        Self::new(vec![Ok(answer.to_string()); times])
    }

    fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn prompt(&self, n: usize) -> String {
        self.calls.lock().unwrap()[n].clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError> {
        self.calls.lock().unwrap().push(prompt.to_string());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GeneratorError::Unavailable("no scripted answer left".into())))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Never answers.
struct SilentGenerator;

#[async_trait]
impl Generator for SilentGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, GeneratorError> {
        std::future::pending().await
    }

    fn model_name(&self) -> &str {
        "silent"
    }
}

fn pipeline_with(generator: Arc<dyn Generator>, max_retries: u32) -> TranslationPipeline {
    let mut config = Config::minimal();
    config.pipeline.max_retries = max_retries;
    TranslationPipeline::new(&config, generator, Arc::new(PromptBook::builtin()))
}

fn answer(sql: &str, params: &str) -> String {
    format!(
        "Aquí está la consulta:\n### RESPUESTA\n```sql\n{}\n```\n```json\n{}\n```\n",
        sql, params
    )
}

const SAFE_SQL: &str = "SELECT * FROM propiedades WHERE precio < %s";

#[tokio::test]
async fn test_full_statement_and_params_accepted() {
    let generator = ScriptedGenerator::new(vec![Ok(answer(SAFE_SQL, "[500000]"))]);
    let translation = pipeline_with(generator.clone(), 3)
        .translate("casas por menos de 500000")
        .await
        .unwrap();

    assert_eq!(translation.template.fragment, "precio < %s");
    assert_eq!(translation.params.0, vec![ParamValue::Int(500000)]);
    assert!(translation.template.sql.contains("WHERE (precio < %s)"));
    assert!(translation.attempts.is_empty());
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_stacked_statement_is_repaired() {
    let stacked = answer(
        "SELECT * FROM propiedades WHERE precio < %s; DROP TABLE propiedades;",
        "[500000]",
    );
    let generator =
        ScriptedGenerator::new(vec![Ok(stacked), Ok(answer(SAFE_SQL, "[500000]"))]);
    let translation = pipeline_with(generator.clone(), 3)
        .translate("casas")
        .await
        .unwrap();

    assert_eq!(translation.attempts.len(), 1);
    assert_eq!(
        translation.attempts[0].reason,
        Rejection::Validation(ValidationError::MultipleStatements)
    );
    assert!(!translation.template.sql.contains("DROP"));
}

#[tokio::test]
async fn test_fragment_escaping_the_skeleton_is_repaired() {
    let escape = answer(
        "SELECT * FROM propiedades WHERE precio < %s) UNION SELECT id, password FROM usuarios WHERE (1 = 1",
        "[1]",
    );
    let generator = ScriptedGenerator::new(vec![Ok(escape), Ok(answer(SAFE_SQL, "[500000]"))]);
    let translation = pipeline_with(generator.clone(), 3)
        .translate("casas baratas")
        .await
        .unwrap();

    assert_eq!(translation.attempts.len(), 1);
    assert!(matches!(
        translation.attempts[0].reason,
        Rejection::Validation(ValidationError::NotASelect | ValidationError::SyntaxError(_))
    ));
    assert!(!translation.template.sql.contains("UNION"));
    assert!(!translation.template.sql.contains("usuarios"));
}

#[tokio::test]
async fn test_escaping_fragment_never_executes() {
    let escape = answer(
        "SELECT * FROM propiedades WHERE precio < %s) OR (1 = 1",
        "[1]",
    );
    let generator = ScriptedGenerator::repeating(&escape, 10);
    let repo = Arc::new(InMemoryPropertyRepository::new(Vec::new()));
    let service = SearchService::new(pipeline_with(generator.clone(), 1), repo.clone());

    let err = service.search("casas").await.unwrap_err();
    assert!(matches!(
        err,
        SearchError::Translation(TranslationError::RepairExhausted {
            last_reason: Rejection::Validation(ValidationError::SyntaxError(_)),
            ..
        })
    ));
    assert!(repo.executed().is_empty());
}

#[tokio::test]
async fn test_placeholder_inside_literal_requests_correction() {
    let literal = answer(
        "SELECT * FROM propiedades WHERE ubicacion LIKE '%santa%'",
        "[1]",
    );
    let fixed = answer(
        "SELECT * FROM propiedades WHERE ubicacion LIKE %s",
        "[\"%santa%\"]",
    );
    let generator = ScriptedGenerator::new(vec![Ok(literal), Ok(fixed)]);
    let translation = pipeline_with(generator.clone(), 3)
        .translate("casas en santa catarina")
        .await
        .unwrap();

    assert_eq!(
        translation.attempts[0].reason,
        Rejection::Validation(ValidationError::PlaceholderParamMismatch {
            placeholders: 0,
            params: 1
        })
    );
    assert_eq!(
        translation.params.0,
        vec![ParamValue::Text("%santa%".into())]
    );
}

#[tokio::test]
async fn test_arity_mismatch_requests_correction() {
    let two_for_one = answer(
        "SELECT * FROM propiedades WHERE precio < %s AND habitaciones >= %s",
        "[500000]",
    );
    let fixed = answer(
        "SELECT * FROM propiedades WHERE precio < %s AND habitaciones >= %s",
        "[500000, 3]",
    );
    let generator = ScriptedGenerator::new(vec![Ok(two_for_one), Ok(fixed)]);
    let translation = pipeline_with(generator.clone(), 3)
        .translate("casas de 3 habitaciones por menos de 500000")
        .await
        .unwrap();

    assert_eq!(
        translation.attempts[0].reason,
        Rejection::Validation(ValidationError::PlaceholderParamMismatch {
            placeholders: 2,
            params: 1
        })
    );
    assert_eq!(translation.params.len(), 2);

    let repair_prompt = generator.prompt(1);
    assert!(repair_prompt.contains("[500000]"));
    assert!(repair_prompt.contains("habitaciones >= %s"));
    assert!(repair_prompt.contains("casas de 3 habitaciones"));
}

#[tokio::test]
async fn test_no_blocks_fails_without_repair() {
    let generator = ScriptedGenerator::new(vec![Ok("Lo siento, no entiendo la consulta.".into())]);
    let err = pipeline_with(generator.clone(), 3)
        .translate("???")
        .await
        .unwrap_err();

    assert_eq!(
        err,
        TranslationError::Unparseable(Rejection::Extraction(ExtractionError::NoBlocksFound))
    );
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_exhaustion_never_executes() {
    let unsafe_answer = answer("SELECT * FROM propiedades WHERE precio < %s", "[1, 2]");
    let generator = ScriptedGenerator::repeating(&unsafe_answer, 10);
    let repo = Arc::new(InMemoryPropertyRepository::new(Vec::new()));
    let service = SearchService::new(pipeline_with(generator.clone(), 3), repo.clone());

    let err = service.search("casas").await.unwrap_err();
    match err {
        SearchError::Translation(TranslationError::RepairExhausted {
            attempts,
            last_reason,
        }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(
                last_reason,
                Rejection::Validation(ValidationError::PlaceholderParamMismatch { .. })
            ));
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
    assert_eq!(generator.calls(), 4);
    assert!(repo.executed().is_empty());
}

#[tokio::test]
async fn test_correction_calls_bounded_by_max_retries() {
    let unsafe_answer = answer("UPDATE propiedades SET precio = %s", "[1]");
    for max_retries in 0..=4u32 {
        let generator = ScriptedGenerator::repeating(&unsafe_answer, 10);
        let err = pipeline_with(generator.clone(), max_retries)
            .translate("casas")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TranslationError::RepairExhausted { attempts, .. } if attempts == max_retries
        ));
        assert_eq!(generator.calls() as u32, max_retries + 1);
    }
}

#[tokio::test]
async fn test_failed_correction_call_uses_an_attempt() {
    let mismatch = answer(SAFE_SQL, "[]");
    let generator = ScriptedGenerator::new(vec![
        Ok(mismatch),
        Err(GeneratorError::Unavailable("connection reset".into())),
        Ok(answer(SAFE_SQL, "[250000]")),
    ]);
    let translation = pipeline_with(generator.clone(), 3)
        .translate("casas")
        .await
        .unwrap();

    assert_eq!(translation.attempts.len(), 2);
    assert!(translation.attempts[0].generator_error.is_some());
    assert!(translation.attempts[0].template_after.is_none());
    assert_eq!(translation.params.0, vec![ParamValue::Int(250000)]);
}

#[tokio::test]
async fn test_unparseable_correction_keeps_last_template() {
    let mismatch = answer(SAFE_SQL, "[]");
    let generator = ScriptedGenerator::new(vec![
        Ok(mismatch),
        Ok("No puedo corregir esto.".into()),
        Ok("Sigo sin poder.".into()),
    ]);
    let err = pipeline_with(generator.clone(), 2)
        .translate("casas")
        .await
        .unwrap_err();

    assert_eq!(
        err,
        TranslationError::RepairExhausted {
            attempts: 2,
            last_reason: Rejection::Extraction(ExtractionError::NoBlocksFound),
        }
    );
    // Both correction prompts quote the last template that parsed
    assert!(generator.prompt(2).contains("precio < %s"));
}

#[tokio::test]
async fn test_silent_generator_times_out() {
    let pipeline = pipeline_with(Arc::new(SilentGenerator), 3)
        .with_call_timeout(Duration::from_millis(50));
    let err = pipeline.translate("casas").await.unwrap_err();
    assert_eq!(
        err,
        TranslationError::Generator(GeneratorError::Timeout(Duration::from_millis(50)))
    );
}

#[tokio::test]
async fn test_search_returns_sql_and_rows() {
    let generator = ScriptedGenerator::new(vec![Ok(answer(
        "SELECT * FROM propiedades WHERE zona_administrativa = %s AND precio < %s",
        "[\"zona 10\", 300000]",
    ))]);
    let row = json!({ "id": 12, "titulo": "Casa con piscina" });
    let repo = Arc::new(InMemoryPropertyRepository::new(vec![row
        .as_object()
        .unwrap()
        .clone()]));
    let service = SearchService::new(pipeline_with(generator, 3), repo.clone());

    let response = service
        .search("  casas en zona 10 por menos de 300000  ")
        .await
        .unwrap();

    assert!(response.sql.contains("zona_administrativa = %s AND precio < %s"));
    assert_eq!(response.results.len(), 1);

    let executed = repo.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].0, response.sql);
    assert_eq!(
        executed[0].1 .0,
        vec![ParamValue::Text("zona 10".into()), ParamValue::Int(300000)]
    );
}

#[tokio::test]
async fn test_concurrent_requests_share_one_pipeline() {
    let answers: Vec<String> = (0..8)
        .map(|i| answer(SAFE_SQL, &format!("[{}]", 100000 * (i + 1))))
        .collect();
    let generator = ScriptedGenerator::new(answers.into_iter().map(Ok).collect());
    let pipeline = Arc::new(pipeline_with(generator.clone(), 3));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.translate("casas").await })
        })
        .collect();

    for handle in handles {
        let translation = handle.await.unwrap().unwrap();
        assert_eq!(translation.params.len(), 1);
    }
    assert_eq!(generator.calls(), 8);
}
