// tests/integration/orchestrator.rs
use super::{
    chunk, faulty_orchestrator, harness, harness_with_memory, untitled, Arc, FaultyMemory,
    StaticVectorStore,
};
use std::sync::atomic::Ordering;
use tutor_controller::models::internal::{ChatRequest, ModelReply, Role};
use tutor_controller::models::pedagogy::PedagogyMode;
use tutor_controller::orchestrator::prompt_builder::BASE_SYSTEM_PREAMBLE;
use tutor_controller::orchestrator::title::PLACEHOLDER_TITLE;
use tutor_controller::orchestrator::{ChatOrchestrator, ChatServiceError, ChatSettings};
use tutor_controller::services::model_client::MockModelClient;
use tutor_controller::services::prompt_service::{PromptService, StaticPromptStore};
use tutor_controller::storage::memory::ConversationMemory;
use tutor_controller::storage::InMemoryConversationMemory;

fn python_chunks() -> StaticVectorStore {
    StaticVectorStore::with_texts(&[
        "Python is a high-level programming language.",
        "Python emphasises readability.",
    ])
}

fn reply(text: &str) -> ModelReply {
    ModelReply {
        text: text.to_string(),
        tokens_input: Some(100),
        tokens_output: Some(50),
        model_id: Some("test-model".to_string()),
    }
}

fn is_title_request(messages: &[tutor_controller::models::internal::ChatMessage]) -> bool {
    messages
        .first()
        .map(|m| m.content.starts_with("Create a short title"))
        .unwrap_or(false)
}

fn prompt_of_call(model: &MockModelClient, call: usize) -> String {
    model.calls()[call][0].content.clone()
}

#[tokio::test]
async fn test_fresh_session_turn() {
    let h = harness(
        python_chunks(),
        MockModelClient::replying("Python is a language."),
        untitled(),
    );

    let result = h
        .orchestrator
        .chat(ChatRequest::new("What is Python?"))
        .await
        .unwrap();

    assert!(result.is_new_session);
    assert_eq!(result.history_length, 0);
    assert_eq!(result.context_ids, vec!["chunk-1", "chunk-2"]);
    assert_eq!(result.answer, "Python is a language.");
    assert_eq!(result.pedagogy_mode, PedagogyMode::Explanatory);
    assert_eq!(result.tokens_input, Some(100));
    assert_eq!(result.tokens_output, Some(50));
    assert_eq!(result.model_id.as_deref(), Some("test-model"));
    assert!(result.title.is_none());
    assert!(uuid::Uuid::parse_str(&result.session_id).is_ok());

    let history = h.memory.get_history(&result.session_id, None).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "What is Python?");
    assert_eq!(history[0].tokens, Some(100));
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].tokens, Some(50));
    assert_eq!(
        history[1].context_ids,
        Some(vec!["chunk-1".to_string(), "chunk-2".to_string()])
    );

    let info = h.memory.get_session_info(&result.session_id).await.unwrap().unwrap();
    assert_eq!(info.total_tokens, 150);
}

#[tokio::test]
async fn test_follow_up_turn_includes_history() {
    let h = harness(
        python_chunks(),
        MockModelClient::replying("Python is a language."),
        untitled(),
    );

    let first = h
        .orchestrator
        .chat(ChatRequest::new("What is Python?"))
        .await
        .unwrap();
    let second = h
        .orchestrator
        .chat(ChatRequest::new("Is it compiled?").with_session(first.session_id.clone()))
        .await
        .unwrap();

    assert!(!second.is_new_session);
    assert_eq!(second.session_id, first.session_id);
    assert_eq!(second.history_length, 2);

    let prompt = prompt_of_call(&h.model, 1);
    assert!(prompt.contains("Previous conversation:"));
    assert!(prompt.contains("Student: What is Python?"));
    assert!(prompt.contains("Tutor: Python is a language."));
    assert!(prompt.ends_with("Current question:\nIs it compiled?"));

    assert_eq!(
        h.memory.get_session_info(&first.session_id).await.unwrap().unwrap().message_count,
        4
    );
}

#[tokio::test]
async fn test_model_failure_leaves_memory_unchanged() {
    let h = harness(python_chunks(), MockModelClient::failing("boom"), untitled());
    h.memory
        .add_message("existing", Role::User, "earlier question", Some(3), None)
        .await
        .unwrap();

    let err = h
        .orchestrator
        .chat(ChatRequest::new("What is Python?").with_session("existing"))
        .await
        .unwrap_err();

    assert!(matches!(err, ChatServiceError::ModelCall(_)));
    assert!(err.to_string().starts_with("Agent call failed:"));

    let info = h.memory.get_session_info("existing").await.unwrap().unwrap();
    assert_eq!(info.message_count, 1);
    assert_eq!(info.total_tokens, 3);
}

#[tokio::test]
async fn test_model_failure_on_new_session_creates_nothing() {
    let h = harness(python_chunks(), MockModelClient::failing("boom"), untitled());

    let result = h
        .orchestrator
        .chat(
            ChatRequest::new("What is Python?")
                .with_session("brand-new")
                .with_mode("debugging"),
        )
        .await;

    assert!(result.is_err());
    assert!(!h.memory.session_exists("brand-new").await.unwrap());
    assert_eq!(h.memory.session_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_retrieval_failure_aborts_turn() {
    let h = harness(python_chunks(), MockModelClient::replying("unused"), untitled());
    h.vectors.set_failing(true);

    let err = h
        .orchestrator
        .chat(ChatRequest::new("What is Python?").with_session("s1"))
        .await
        .unwrap_err();

    assert!(matches!(err, ChatServiceError::Retrieval(_)));
    assert!(err.to_string().starts_with("Vector search failed:"));
    assert_eq!(h.model.call_count(), 0);
    assert!(!h.memory.session_exists("s1").await.unwrap());
}

#[tokio::test]
async fn test_retrieval_runs_even_without_history() {
    let h = harness(python_chunks(), MockModelClient::replying("ok"), untitled());

    h.orchestrator
        .chat(ChatRequest::new("q").without_history())
        .await
        .unwrap();

    assert_eq!(h.vectors.searches(), 1);
}

#[tokio::test]
async fn test_legacy_mode_is_migrated_on_every_turn() {
    let h = harness(python_chunks(), MockModelClient::replying("ok"), untitled());
    h.memory.set_pedagogy_mode("legacy", "socratic").await.unwrap();

    for call in 0..3 {
        let result = h
            .orchestrator
            .chat(ChatRequest::new("quiz me").with_session("legacy"))
            .await
            .unwrap();
        assert_eq!(result.pedagogy_mode, PedagogyMode::Practice);
        assert!(prompt_of_call(&h.model, call).contains("practice mode instructions"));
    }

    // Read-side migration leaves the stored value alone
    assert_eq!(h.memory.get_pedagogy_mode("legacy").await.unwrap(), "socratic");
}

#[tokio::test]
async fn test_review_mode_migrates_to_explanatory() {
    let h = harness(python_chunks(), MockModelClient::replying("ok"), untitled());
    h.memory.set_pedagogy_mode("old", "review").await.unwrap();

    let result = h
        .orchestrator
        .chat(ChatRequest::new("recap loops").with_session("old"))
        .await
        .unwrap();

    assert_eq!(result.pedagogy_mode, PedagogyMode::Explanatory);
}

#[tokio::test]
async fn test_explicit_mode_is_persisted() {
    let h = harness(python_chunks(), MockModelClient::replying("ok"), untitled());

    let result = h
        .orchestrator
        .chat(ChatRequest::new("my loop never ends").with_mode("Debugging"))
        .await
        .unwrap();

    assert_eq!(result.pedagogy_mode, PedagogyMode::Debugging);
    assert_eq!(
        h.memory.get_pedagogy_mode(&result.session_id).await.unwrap(),
        "debugging"
    );
    assert!(h
        .model
        .first_prompt()
        .unwrap()
        .contains("debugging mode instructions"));

    // Later turns without a mode keep it
    let next = h
        .orchestrator
        .chat(ChatRequest::new("still stuck").with_session(result.session_id.clone()))
        .await
        .unwrap();
    assert_eq!(next.pedagogy_mode, PedagogyMode::Debugging);
}

#[tokio::test]
async fn test_invalid_mode_falls_back_to_default() {
    let h = harness(python_chunks(), MockModelClient::replying("ok"), untitled());
    h.memory.set_pedagogy_mode("s1", "debugging").await.unwrap();

    let result = h
        .orchestrator
        .chat(ChatRequest::new("hello").with_session("s1").with_mode("lecture"))
        .await
        .unwrap();

    assert_eq!(result.pedagogy_mode, PedagogyMode::Explanatory);
    assert_eq!(h.memory.get_pedagogy_mode("s1").await.unwrap(), "explanatory");
}

#[tokio::test]
async fn test_retired_name_as_explicit_mode_falls_back_to_default() {
    let h = harness(python_chunks(), MockModelClient::replying("ok"), untitled());

    let result = h
        .orchestrator
        .chat(ChatRequest::new("hello").with_mode("socratic"))
        .await
        .unwrap();

    assert_eq!(result.pedagogy_mode, PedagogyMode::Explanatory);
}

#[tokio::test]
async fn test_reasoning_is_stripped_before_storage() {
    let h = harness(
        python_chunks(),
        MockModelClient::replying("<Reasoning>\nthe student wants basics\n</Reasoning>\n\n\n\nPython is a language."),
        untitled(),
    );

    let result = h
        .orchestrator
        .chat(ChatRequest::new("What is Python?"))
        .await
        .unwrap();

    assert_eq!(result.answer, "Python is a language.");
    let history = h.memory.get_history(&result.session_id, None).await.unwrap();
    assert_eq!(history[1].content, "Python is a language.");
}

#[tokio::test]
async fn test_context_is_cut_to_budget() {
    let settings = ChatSettings {
        max_context_chars: 50,
        ..untitled()
    };
    let long = "x".repeat(51);
    let h = harness(
        StaticVectorStore::with_texts(&[long.as_str()]),
        MockModelClient::replying("ok"),
        settings,
    );

    h.orchestrator.chat(ChatRequest::new("q")).await.unwrap();

    let prompt = h.model.first_prompt().unwrap();
    let expected_block = format!("Relevant course materials:\n{}\n\n", "x".repeat(50));
    assert!(prompt.contains(&expected_block));
    assert!(!prompt.contains(&"x".repeat(51)));
}

#[tokio::test]
async fn test_prompt_layout() {
    let h = harness(python_chunks(), MockModelClient::replying("ok"), untitled());

    h.orchestrator
        .chat(ChatRequest::new("What is Python?"))
        .await
        .unwrap();

    let prompt = h.model.first_prompt().unwrap();
    assert!(prompt.starts_with(BASE_SYSTEM_PREAMBLE));
    assert!(prompt.contains("\n\n---\n\nexplanatory mode instructions"));
    assert!(prompt.contains(
        "Relevant course materials:\nPython is a high-level programming language.\n---\nPython emphasises readability."
    ));
    assert!(!prompt.contains("Previous conversation:"));
    assert!(prompt.ends_with("Current question:\nWhat is Python?"));
    assert_eq!(h.model.calls()[0].len(), 1);
    assert_eq!(h.model.calls()[0][0].role, "user");
}

#[tokio::test]
async fn test_missing_mode_prompt_uses_base_preamble() {
    let memory = Arc::new(InMemoryConversationMemory::new(10));
    let model = Arc::new(MockModelClient::replying("ok"));
    let orchestrator = ChatOrchestrator::new(
        memory,
        Arc::new(python_chunks()),
        model.clone(),
        Arc::new(PromptService::new(Arc::new(StaticPromptStore::new()))),
        untitled(),
    );

    let result = orchestrator.chat(ChatRequest::new("q")).await.unwrap();

    assert_eq!(result.answer, "ok");
    let prompt = model.first_prompt().unwrap();
    assert!(prompt.starts_with(&format!("{}\n\nRelevant course materials:", BASE_SYSTEM_PREAMBLE)));
}

#[tokio::test]
async fn test_history_length_grows_then_caps() {
    let settings = ChatSettings {
        max_history_messages: 4,
        ..untitled()
    };
    let h = harness(python_chunks(), MockModelClient::replying("ok"), settings);

    let mut lengths = Vec::new();
    for turn in 0..4 {
        let result = h
            .orchestrator
            .chat(ChatRequest::new(format!("question {}", turn)).with_session("s1"))
            .await
            .unwrap();
        lengths.push(result.history_length);
    }

    assert_eq!(lengths, vec![0, 2, 4, 4]);
}

#[tokio::test]
async fn test_history_can_be_excluded() {
    let h = harness(python_chunks(), MockModelClient::replying("ok"), untitled());

    h.orchestrator
        .chat(ChatRequest::new("first").with_session("s1"))
        .await
        .unwrap();
    let result = h
        .orchestrator
        .chat(ChatRequest::new("second").with_session("s1").without_history())
        .await
        .unwrap();

    assert_eq!(result.history_length, 0);
    assert!(!prompt_of_call(&h.model, 1).contains("Previous conversation:"));
    // The exchange is still recorded
    assert_eq!(h.memory.get_history("s1", None).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_long_history_messages_are_clipped_in_prompt() {
    let settings = ChatSettings {
        history_message_chars: 10,
        ..untitled()
    };
    let h = harness(python_chunks(), MockModelClient::replying("ok"), settings);
    h.memory
        .add_message("s1", Role::User, "abcdefghijklmnopqrstuvwxyz", None, None)
        .await
        .unwrap();

    h.orchestrator
        .chat(ChatRequest::new("next").with_session("s1"))
        .await
        .unwrap();

    let prompt = h.model.first_prompt().unwrap();
    assert!(prompt.contains("Student: abcdefghij...\n"));
    assert!(!prompt.contains("abcdefghijk"));
}

#[tokio::test]
async fn test_top_k_is_forwarded() {
    let h = harness(python_chunks(), MockModelClient::replying("ok"), untitled());

    let result = h
        .orchestrator
        .chat(ChatRequest::new("q").with_top_k(1))
        .await
        .unwrap();

    assert_eq!(result.context_ids, vec!["chunk-1"]);
}

#[tokio::test]
async fn test_blank_session_id_starts_new_session() {
    let h = harness(python_chunks(), MockModelClient::replying("ok"), untitled());

    let result = h
        .orchestrator
        .chat(ChatRequest::new("q").with_session("   "))
        .await
        .unwrap();

    assert!(result.is_new_session);
    assert_ne!(result.session_id.trim(), "");
}

#[tokio::test]
async fn test_unknown_session_id_is_adopted() {
    let h = harness(python_chunks(), MockModelClient::replying("ok"), untitled());

    let result = h
        .orchestrator
        .chat(ChatRequest::new("q").with_session("client-chosen"))
        .await
        .unwrap();

    assert!(result.is_new_session);
    assert_eq!(result.session_id, "client-chosen");
    assert!(h.memory.session_exists("client-chosen").await.unwrap());
}

#[tokio::test]
async fn test_title_generated_for_new_session() {
    let model = MockModelClient::with_responder(|messages| {
        if is_title_request(messages) {
            Ok(reply("\"Python Basics\""))
        } else {
            Ok(reply("Python is a language."))
        }
    });
    let h = harness(python_chunks(), model, ChatSettings::default());

    let result = h
        .orchestrator
        .chat(ChatRequest::new("What is Python?"))
        .await
        .unwrap();

    assert_eq!(result.title.as_deref(), Some("Python Basics"));
    assert_eq!(h.model.call_count(), 2);
    assert!(prompt_of_call(&h.model, 1).contains("What is Python?"));

    let info = h.memory.get_session_info(&result.session_id).await.unwrap().unwrap();
    assert_eq!(info.title.as_deref(), Some("Python Basics"));

    // No second title for an existing session
    let next = h
        .orchestrator
        .chat(ChatRequest::new("more").with_session(result.session_id.clone()))
        .await
        .unwrap();
    assert!(next.title.is_none());
    assert_eq!(h.model.call_count(), 3);
}

#[tokio::test]
async fn test_long_title_is_truncated() {
    let model = MockModelClient::with_responder(|messages| {
        if is_title_request(messages) {
            Ok(reply("An Unreasonably Long Title About Python Lists"))
        } else {
            Ok(reply("answer"))
        }
    });
    let h = harness(python_chunks(), model, ChatSettings::default());

    let title = h
        .orchestrator
        .chat(ChatRequest::new("lists?"))
        .await
        .unwrap()
        .title
        .unwrap();

    assert!(title.chars().count() <= 30);
    assert!(title.ends_with("..."));
}

#[tokio::test]
async fn test_title_failure_never_fails_turn() {
    let model = MockModelClient::with_responder(|messages| {
        if is_title_request(messages) {
            Err("title backend down".to_string())
        } else {
            Ok(reply("Python is a language."))
        }
    });
    let h = harness(python_chunks(), model, ChatSettings::default());

    let result = h
        .orchestrator
        .chat(ChatRequest::new("What is Python?"))
        .await
        .unwrap();

    assert_eq!(result.answer, "Python is a language.");
    assert_eq!(result.title.as_deref(), Some(PLACEHOLDER_TITLE));
    assert_eq!(
        h.memory.get_history(&result.session_id, None).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_title_storage_failure_never_fails_turn() {
    let memory = Arc::new(FaultyMemory::default());
    memory.fail_titles.store(true, Ordering::SeqCst);
    let orchestrator = faulty_orchestrator(memory.clone(), MockModelClient::replying("Loops repeat."));

    let result = orchestrator
        .chat(ChatRequest::new("What is a loop?"))
        .await
        .unwrap();

    assert_eq!(result.answer, "Loops repeat.");
    assert!(result.title.is_some());
    assert_eq!(
        memory.get_history(&result.session_id, None).await.unwrap().len(),
        2
    );
    let info = memory.get_session_info(&result.session_id).await.unwrap().unwrap();
    assert_eq!(info.title, None);
}

#[tokio::test]
async fn test_failed_persistence_leaves_nothing_behind() {
    let memory = Arc::new(FaultyMemory::default());
    memory.fail_exchanges.store(true, Ordering::SeqCst);
    let orchestrator = faulty_orchestrator(memory.clone(), MockModelClient::replying("Loops repeat."));

    let err = orchestrator
        .chat(
            ChatRequest::new("What is a loop?")
                .with_session("s1")
                .with_mode("practice"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ChatServiceError::Memory(_)));
    assert!(!memory.session_exists("s1").await.unwrap());
    assert_eq!(memory.session_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_eviction_during_chat_keeps_cap() {
    let h = harness_with_memory(
        InMemoryConversationMemory::new(2),
        python_chunks(),
        MockModelClient::replying("ok"),
        untitled(),
    );

    for id in ["a", "b", "c"] {
        h.orchestrator
            .chat(ChatRequest::new("q").with_session(id))
            .await
            .unwrap();
    }

    assert_eq!(h.memory.session_count().await.unwrap(), 2);
    assert!(!h.memory.session_exists("a").await.unwrap());
}

#[tokio::test]
async fn test_chunk_ids_follow_retrieval_order() {
    let store = StaticVectorStore::new(vec![chunk("z-last", "one"), chunk("a-first", "two")]);
    let h = harness(store, MockModelClient::replying("ok"), untitled());

    let result = h.orchestrator.chat(ChatRequest::new("q")).await.unwrap();

    assert_eq!(result.context_ids, vec!["z-last", "a-first"]);
}
