//! End-to-end query scenarios over the in-process graph and model doubles.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;

use biograph_chat::{Session, SessionError, SessionState};
use biograph_core::{ContextPolicy, ConversationId, MaxTokens, Settings, CONTEXT_UNAVAILABLE_MARKER};
use biograph_graph::memory::MemoryGraph;
use biograph_graph::GraphError;
use biograph_llm::mock::ScriptedModel;
use biograph_llm::ModelError;

fn settings(overrides: &[(&str, &str)]) -> Arc<Settings> {
    let mut vars: HashMap<String, String> = [
        ("BIOGRAPH_NEO4J__URI", "bolt://localhost:7687"),
        ("BIOGRAPH_NEO4J__USER", "neo4j"),
        ("BIOGRAPH_NEO4J__PASSWORD", "test"),
        ("BIOGRAPH_MODEL__NAME", "gpt-4o"),
        ("BIOGRAPH_MODEL__API_KEY", "sk-test"),
        ("BIOGRAPH_MODEL__TEMPERATURE", "0"),
        ("BIOGRAPH_MODEL__MAX_TOKENS", "2000"),
        ("BIOGRAPH_NEO4J__TIMEOUT_SECS", "0.2"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in overrides {
        vars.insert(k.to_string(), v.to_string());
    }
    Arc::new(Settings::from_env_map(vars).unwrap())
}

async fn open(
    settings: &Arc<Settings>,
    graph: MemoryGraph,
    model: ScriptedModel,
) -> (Session, Arc<ScriptedModel>) {
    let model = Arc::new(model);
    let session = Session::open(ConversationId::new(), Arc::clone(settings), Arc::new(graph), model.clone())
        .await
        .unwrap();
    (session, model)
}

#[tokio::test]
async fn test_answer_without_graph_context() {
    let settings = settings(&[]);
    assert_eq!(settings.model_name, "gpt-4o");
    assert_eq!(settings.temperature, 0.0);
    assert_eq!(settings.max_tokens, MaxTokens::Limited(2000));

    let (session, model) = open(
        &settings,
        MemoryGraph::new(Vec::<String>::new()),
        ScriptedModel::new("gpt-4o").reply("DNA is the molecule that carries genetic information."),
    )
    .await;

    let answer = session.ask("What is DNA?").await.unwrap();
    assert!(!answer.is_empty());

    let prompt = model.last_prompt().unwrap();
    assert!(prompt.user().contains("no context available"));
    assert!(!prompt.user().contains(CONTEXT_UNAVAILABLE_MARKER));
    assert!(prompt.user().contains("What is DNA?"));
    assert_eq!(session.info().degraded_contexts, 0);
}

#[tokio::test]
async fn test_graph_facts_reach_the_prompt_in_order() {
    let (session, model) = open(
        &settings(&[]),
        MemoryGraph::new([
            "RORA -[ASSOCIATED_WITH]-> childhood-onset asthma",
            "RORA -[EXPRESSED_IN]-> lung",
            "BRCA1 -[ASSOCIATED_WITH]-> breast cancer",
        ]),
        ScriptedModel::new("gpt-4o").reply("answer"),
    )
    .await;

    session.ask("Which diseases involve RORA?").await.unwrap();

    let user = model.last_prompt().unwrap().user().to_string();
    let first = user.find("- RORA -[ASSOCIATED_WITH]-> childhood-onset asthma").unwrap();
    let second = user.find("- RORA -[EXPRESSED_IN]-> lung").unwrap();
    assert!(first < second);
    assert!(!user.contains("BRCA1"));
    assert!(!user.contains("no context available"));
}

#[tokio::test]
async fn test_stream_failure_after_partial_answer() {
    let (session, _) = open(
        &settings(&[]),
        MemoryGraph::new(Vec::<String>::new()),
        ScriptedModel::new("gpt-4o")
            .chunks_then_fail(["DNA ", "is "], ModelError::Unavailable("connection reset".into()))
            .reply("recovered"),
    )
    .await;

    let mut stream = session.ask_stream("What is DNA?").await.unwrap();
    let mut received = Vec::new();
    let mut failure = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => received.push(chunk),
            Err(e) => failure = Some(e),
        }
    }

    assert_eq!(received, vec!["DNA ", "is "]);
    assert!(matches!(
        failure,
        Some(SessionError::Model(ModelError::Unavailable(_)))
    ));
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.info().queries_processed, 0);

    assert_eq!(session.ask("again").await.unwrap(), "recovered");
}

#[tokio::test]
async fn test_streamed_answer_matches_chunks() {
    let (session, _) = open(
        &settings(&[]),
        MemoryGraph::new(Vec::<String>::new()),
        ScriptedModel::new("gpt-4o").chunks(["Asthma ", "is ", "a ", "chronic ", "disease."]),
    )
    .await;

    let stream = session.ask_stream("What is asthma?").await.unwrap();
    assert_eq!(
        stream.collect_text().await.unwrap(),
        "Asthma is a chronic disease."
    );
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.info().queries_processed, 1);
}

#[tokio::test]
async fn test_degraded_graph_still_answers() {
    let settings = settings(&[]);
    assert_eq!(settings.context_policy, ContextPolicy::Degrade);

    let (session, model) = open(
        &settings,
        MemoryGraph::new(["RORA -[ASSOCIATED_WITH]-> asthma"]).failing("index offline"),
        ScriptedModel::new("gpt-4o").reply("general answer"),
    )
    .await;

    assert_eq!(session.ask("Tell me about RORA").await.unwrap(), "general answer");
    let user = model.last_prompt().unwrap().user().to_string();
    assert!(user.contains(CONTEXT_UNAVAILABLE_MARKER));
    assert!(!user.contains("RORA -[ASSOCIATED_WITH]-> asthma"));
    assert_eq!(session.info().degraded_contexts, 1);
}

#[tokio::test]
async fn test_fatal_graph_policy_fails_the_query() {
    let (session, model) = open(
        &settings(&[("BIOGRAPH_CONTEXT__POLICY", "fatal")]),
        MemoryGraph::new(Vec::<String>::new()).hanging(),
        ScriptedModel::new("gpt-4o").reply("unused"),
    )
    .await;

    let err = session.ask("Tell me about RORA").await.unwrap_err();
    assert!(matches!(err, SessionError::Graph(GraphError::Timeout { .. })));
    assert_eq!(model.calls(), 0);
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_template_markers_in_query_are_literal() {
    let (session, model) = open(
        &settings(&[]),
        MemoryGraph::new(Vec::<String>::new()),
        ScriptedModel::new("gpt-4o").reply("ok"),
    )
    .await;

    session.ask("Explain {graph_context} and {query}").await.unwrap();
    let user = model.last_prompt().unwrap().user().to_string();
    assert!(user.contains("Explain {graph_context} and {query}"));
    assert_eq!(user.matches("no context available").count(), 1);
}
