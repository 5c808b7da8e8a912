//! Line-oriented chat loop.

use std::io::{self, Write};

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use toolmux_agent::ToolLoop;
use toolmux_core::{Conversation, ModelBackend};
use toolmux_session::{Catalog, HistoryManager, SessionRegistry};

fn is_exit(input: &str) -> bool {
    input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit")
}

/// Print servers that failed to start.
///
/// # Errors
/// Returns error if writing to `out` fails.
pub fn print_open_failures(registry: &SessionRegistry, out: &mut impl Write) -> io::Result<()> {
    for failure in registry.failures() {
        writeln!(out, "Could not start '{}': {}", failure.identity, failure.error)?;
    }
    Ok(())
}

/// Print the discovered-tools index.
///
/// # Errors
/// Returns error if writing to `out` fails.
pub fn print_tool_index(catalog: &Catalog, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "\n=== MCP tools discovered ===")?;
    for (server, tools) in catalog.iter() {
        writeln!(out, "[{server}]")?;
        for tool in tools {
            if tool.description.is_empty() {
                writeln!(out, "  • {}", tool.name)?;
            } else {
                writeln!(out, "  • {} - {}", tool.name, tool.description)?;
            }
        }
    }
    Ok(())
}

/// Read prompts until `quit`/`exit`, EOF or Ctrl-C.
///
/// Each answered turn is trimmed and persisted through `history`. Backend
/// errors are printed and the loop continues.
///
/// # Errors
/// Returns error if reading input or writing output fails.
pub async fn run<B, R, W>(
    agent: &ToolLoop<'_, B>,
    history: &HistoryManager,
    conversation: &mut Conversation,
    input: R,
    out: &mut W,
) -> io::Result<()>
where
    B: ModelBackend,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    writeln!(out, "\nType your prompt. Type 'quit' to exit.\n")?;
    let mut lines = input.lines();

    loop {
        write!(out, "> ")?;
        out.flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                writeln!(out)?;
                None
            }
        };
        let Some(line) = line else {
            break;
        };

        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if is_exit(prompt) {
            break;
        }

        let turn = tokio::select! {
            result = agent.run_turn(conversation, prompt) => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        };
        match turn {
            Some(Ok(answer)) => writeln!(out, "\n{answer}\n")?,
            Some(Err(e)) => {
                tracing::warn!("Turn failed: {e}");
                writeln!(out, "\nError: {e}\n")?;
            }
            None => {
                writeln!(out, "\nInterrupted.")?;
                break;
            }
        }

        history.commit(conversation).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use toolmux_core::{
        BackendError, Message, ModelReply, Role, ToolDefinition, ToolDescriptor, ToolSession,
    };
    use toolmux_session::MemoryStore;

    use super::*;

    /// Echoes the last user message; "fail" produces a backend error.
    #[derive(Default)]
    struct EchoBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelBackend for EchoBackend {
        async fn chat(
            &self,
            messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> Result<ModelReply, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let last = messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            if last == "fail" {
                return Err(BackendError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(ModelReply::text(format!("echo: {last}")))
        }
    }

    fn empty_registry() -> SessionRegistry {
        SessionRegistry::from_sessions(Vec::<(String, Arc<dyn ToolSession>)>::new())
    }

    async fn drive(script: &str, store: &MemoryStore) -> (String, usize) {
        let registry = empty_registry();
        let backend = Arc::new(EchoBackend::default());
        let agent = ToolLoop::new(Arc::clone(&backend), &registry);
        let history = HistoryManager::new(store.clone(), 30);
        let mut conversation = Conversation::seeded("sys");

        let mut out = Vec::new();
        run(&agent, &history, &mut conversation, script.as_bytes(), &mut out)
            .await
            .unwrap();
        (
            String::from_utf8(out).unwrap(),
            backend.calls.load(Ordering::SeqCst),
        )
    }

    #[tokio::test]
    async fn test_quit_is_case_insensitive() {
        let store = MemoryStore::new();
        let (out, calls) = drive("hello\n\n   \nQUIT\nnever sent\n", &store).await;

        assert_eq!(calls, 1);
        assert!(out.contains("echo: hello"));
        assert!(!out.contains("never sent"));
        assert_eq!(
            store.snapshot(),
            [
                Message::system("sys"),
                Message::user("hello"),
                Message::assistant("echo: hello"),
            ]
        );
    }

    #[tokio::test]
    async fn test_eof_ends_loop() {
        let store = MemoryStore::new();
        let (_, calls) = drive("one\ntwo", &store).await;
        assert_eq!(calls, 2);
        assert_eq!(store.snapshot().len(), 5);
    }

    #[tokio::test]
    async fn test_backend_error_is_printed_and_loop_continues() {
        let store = MemoryStore::new();
        let (out, calls) = drive("fail\nagain\nexit\n", &store).await;
        assert_eq!(calls, 2);
        assert!(out.contains("Error: Model backend failed: Backend returned HTTP 500: boom"));
        assert!(out.contains("echo: again"));
    }

    #[test]
    fn test_tool_index_format() {
        let catalog = sample_catalog();
        let mut out = Vec::new();
        print_tool_index(&catalog, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\n=== MCP tools discovered ===\n[filesystem]\n  • read_file - Read a file\n  • stat\n[azure]\n"
        );
    }

    fn sample_catalog() -> Catalog {
        Catalog::from_iter([
            (
                "filesystem",
                vec![
                    ToolDescriptor::new("read_file", Some("Read a file".into())),
                    ToolDescriptor::new("stat", None),
                ],
            ),
            ("azure", Vec::new()),
        ])
    }
}
