
use std::sync::Arc;

use futures::StreamExt;
use itertools::Itertools;
use tracing::{debug, warn};

use crate::ForgeError;
use crate::database::lancedb::vector_store::VectorStore;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::RowSet;
use crate::embeddings::openai::EmbeddingProvider;
use crate::llm::{ChatClient, ChatMessage, TokenStream};

/// How many chunks the vector path feeds into the answer prompt.
const TOP_K: usize = 4;

/// At most this many rows per table are shown to the analysis model.
const ROW_EXCERPT_CAP: usize = 50;

/// Answers visitor questions by combining two retrieval paths over the
/// tenant's data: semantic search over indexed chunks, and a model pass over
/// an excerpt of any uploaded tables.
///
/// The two paths run concurrently and degrade independently. A failure in
/// either one narrows the context instead of failing the chat.
pub struct HybridQueryEngine {
    database: Database,
    vectors: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chat: ChatClient,
}

impl HybridQueryEngine {
    #[inline]
    pub fn new(
        database: Database,
        vectors: Arc<VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: ChatClient,
    ) -> Self {
        Self {
            database,
            vectors,
            embedder,
            chat,
        }
    }

    /// Answer the conversation's latest user question with a streamed
    /// response.
    ///
    /// When a session id is given, the question and the fully accumulated
    /// answer are logged after the fact; logging never delays or fails the
    /// stream.
    #[inline]
    pub async fn respond(
        &self,
        tenant_id: &str,
        messages: Vec<ChatMessage>,
        session_id: Option<String>,
    ) -> crate::Result<TokenStream> {
        let question = latest_user_question(&messages)
            .ok_or_else(|| {
                ForgeError::Validation("Conversation contains no user message".to_string())
            })?
            .to_string();

        let (context, insight) = tokio::join!(
            self.vector_context(tenant_id, &question),
            self.structured_insight(tenant_id, &question),
        );

        let mut prompt = vec![ChatMessage::system(system_prompt(&context, insight.as_deref()))];
        prompt.extend(messages);

        let upstream = self
            .chat
            .stream(&prompt)
            .await
            .map_err(|e| ForgeError::Llm(format!("{e:#}")))?;

        match session_id {
            Some(session_id) => {
                Ok(self.logged_stream(tenant_id, session_id, question, upstream))
            }
            None => Ok(upstream),
        }
    }

    /// Semantic path: embed the question and pull the nearest chunks for
    /// this tenant. Any failure degrades to an empty context.
    async fn vector_context(&self, tenant_id: &str, question: &str) -> String {
        let result = async {
            let query_vector = self.embedder.embed(question).await?;
            let matches = self.vectors.search(tenant_id, &query_vector, TOP_K).await?;
            debug!(
                "Vector path found {} chunks for tenant {}",
                matches.len(),
                tenant_id
            );
            Ok::<_, anyhow::Error>(
                matches
                    .into_iter()
                    .map(|m| m.metadata.content)
                    .join("\n\n---\n\n"),
            )
        }
        .await;

        match result {
            Ok(context) => context,
            Err(error) => {
                warn!("Vector retrieval failed, answering without it: {error:#}");
                String::new()
            }
        }
    }

    /// Structured path: show the model an excerpt of the tenant's uploaded
    /// tables and ask it to answer from the data. Absent tables or any
    /// failure degrade to no insight.
    async fn structured_insight(&self, tenant_id: &str, question: &str) -> Option<String> {
        let row_sets = match self.database.list_row_sets(tenant_id).await {
            Ok(row_sets) => row_sets,
            Err(error) => {
                warn!("Could not load row sets, skipping structured path: {error:#}");
                return None;
            }
        };
        if row_sets.is_empty() {
            return None;
        }

        let excerpt = build_excerpt(&row_sets);
        let prompt = vec![
            ChatMessage::system(
                "You are a data analyst. Answer the question using only the data provided. \
                 If the data cannot answer it, say so briefly.",
            ),
            ChatMessage::user(format!("{excerpt}\n\nQuestion: {question}")),
        ];

        match self.chat.complete(&prompt).await {
            Ok(answer) if !answer.trim().is_empty() => Some(answer),
            Ok(_) => None,
            Err(error) => {
                warn!("Structured analysis failed, answering without it: {error:#}");
                None
            }
        }
    }

    /// Wrap the answer stream so that, once it finishes, the question and
    /// accumulated answer land in the chat log. The caller's stream is fed
    /// from a channel, so logging happens off the response path.
    fn logged_stream(
        &self,
        tenant_id: &str,
        session_id: String,
        question: String,
        mut upstream: TokenStream,
    ) -> TokenStream {
        let (tx, rx) = futures::channel::mpsc::unbounded();
        let database = self.database.clone();
        let tenant_id = tenant_id.to_string();

        tokio::spawn(async move {
            if let Err(error) = database
                .log_chat_message(&tenant_id, &session_id, "user", &question)
                .await
            {
                warn!("Failed to log user message: {error:#}");
            }

            let mut answer = String::new();
            while let Some(item) = upstream.next().await {
                if let Ok(token) = &item {
                    answer.push_str(token);
                }
                if tx.unbounded_send(item).is_err() {
                    // Receiver went away; keep draining so the answer still
                    // gets logged in full.
                    continue;
                }
            }

            if let Err(error) = database
                .log_chat_message(&tenant_id, &session_id, "assistant", &answer)
                .await
            {
                warn!("Failed to log assistant message: {error:#}");
            }
        });

        Box::pin(rx)
    }
}

/// The latest user turn is the question being answered.
fn latest_user_question(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.as_str())
}

fn system_prompt(context: &str, insight: Option<&str>) -> String {
    let mut prompt = String::from(
        "You are a helpful assistant for this business. Answer using the provided \
         knowledge. If the knowledge does not cover the question, say you don't know \
         rather than guessing.",
    );

    if !context.trim().is_empty() {
        prompt.push_str("\n\nRelevant knowledge:\n");
        prompt.push_str(context);
    }
    if let Some(insight) = insight {
        prompt.push_str("\n\nInsight from the business's data tables:\n");
        prompt.push_str(insight);
    }

    prompt
}

/// Render row sets as a compact excerpt for the analysis prompt. Rows beyond
/// [`ROW_EXCERPT_CAP`] per table are summarized by a count, not included.
fn build_excerpt(row_sets: &[RowSet]) -> String {
    row_sets
        .iter()
        .map(|row_set| {
            let headers = row_set.headers().join(", ");
            let rows = row_set.rows();
            let shown = rows.len().min(ROW_EXCERPT_CAP);

            let mut section = format!(
                "Table {} (columns: {}; {} rows",
                row_set.table_name, headers, row_set.row_count
            );
            if rows.len() > shown {
                section.push_str(&format!(", showing first {shown}"));
            }
            section.push_str("):\n");

            for row in rows.iter().take(shown) {
                section.push_str(
                    &serde_json::to_string(row).unwrap_or_else(|_| "{}".to_string()),
                );
                section.push('\n');
            }
            section
        })
        .join("\n")
}
