//! Newline-delimited JSON-RPC over stdin/stdout.
//!
//! The local client is trusted: every message runs under one SYSTEM context
//! and is exempt from rate limiting. Logs go to stderr so stdout carries
//! protocol traffic only.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tracing::{debug, info, warn};

use crate::auth::AuthContext;
use crate::mcp::{CallScope, JsonRpcResponse, MAX_BODY_BYTES, McpRouter};

/// Longest line read in one piece, newline included.
const LINE_LIMIT: u64 = MAX_BODY_BYTES as u64 + 1;

/// Serve messages from `reader` until EOF, writing one response line each.
///
/// Lines longer than [`MAX_BODY_BYTES`] are answered with an invalid-request
/// error and skipped without being buffered.
pub async fn serve_lines<R, W>(
    router: &McpRouter,
    scope: &CallScope,
    mut reader: R,
    mut writer: W,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = (&mut reader).take(LINE_LIMIT).read_until(b'\n', &mut buf).await?;
        if n == 0 {
            break;
        }

        let response = if n as u64 == LINE_LIMIT && buf.last() != Some(&b'\n') {
            warn!(limit = MAX_BODY_BYTES, "Discarding oversized stdin line");
            skip_line(&mut reader).await?;
            Some(JsonRpcResponse::invalid_request(
                Value::Null,
                format!("message exceeds {} bytes", MAX_BODY_BYTES),
            ))
        } else {
            let line = buf.trim_ascii();
            if line.is_empty() {
                continue;
            }
            router.handle_bytes(line, scope).await
        };

        let Some(response) = response else {
            continue;
        };
        debug!(id = %response.id, error = response.is_error(), "stdio response");
        let mut out = response.to_json_string();
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Consume input up to and including the next newline.
async fn skip_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<()> {
    loop {
        let (len, done) = {
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                return Ok(());
            }
            match chunk.iter().position(|b| *b == b'\n') {
                Some(pos) => (pos + 1, true),
                None => (chunk.len(), false),
            }
        };
        reader.consume(len);
        if done {
            return Ok(());
        }
    }
}

pub async fn serve_stdio(router: Arc<McpRouter>, auth: AuthContext) -> anyhow::Result<()> {
    let scope = CallScope::stdio(auth);
    info!(mode = %scope.auth.mode(), "MCP stdio gateway ready");
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve_lines(&router, &scope, stdin, stdout).await?;
    info!("stdin closed; stdio gateway exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::HeaderBag;

    fn responses(out: &[u8]) -> Vec<Value> {
        std::str::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_stdio_answers_each_request_line() {
        let state = crate::test_support::gateway_state(None, 1);
        let scope = CallScope::stdio(AuthContext::system(HeaderBag::new()));
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n",
            "\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n",
            "not json\n",
        );
        let mut out = Vec::new();
        serve_lines(&state.router, &scope, input.as_bytes(), &mut out)
            .await
            .unwrap();

        let resps = responses(&out);
        assert_eq!(resps.len(), 3);
        assert_eq!(resps[0]["id"], 1);
        // limit of 1 does not apply to stdio
        assert_eq!(resps[1]["id"], 2);
        assert!(resps[1].get("error").is_none());
        assert_eq!(resps[2]["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_stdio_oversized_line_is_rejected_and_skipped() {
        let state = crate::test_support::gateway_state(None, 100);
        let scope = CallScope::stdio(AuthContext::system(HeaderBag::new()));
        let mut input = vec![b'a'; MAX_BODY_BYTES + 10];
        input.push(b'\n');
        input.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"id\":5,\"method\":\"ping\"}\n");
        let mut out = Vec::new();
        serve_lines(&state.router, &scope, input.as_slice(), &mut out)
            .await
            .unwrap();

        let resps = responses(&out);
        assert_eq!(resps.len(), 2);
        assert_eq!(resps[0]["error"]["code"], -32600);
        assert_eq!(resps[1]["id"], 5);
        assert!(resps[1].get("error").is_none());
    }

    #[tokio::test]
    async fn test_stdio_without_system_credentials_fails_per_call() {
        let state = crate::test_support::gateway_state(None, 100);
        let scope = CallScope::stdio(AuthContext::system(HeaderBag::new()));
        let input = "{\"jsonrpc\":\"2.0\",\"id\":\"a\",\"method\":\"tools/call\",\"params\":{\"name\":\"jira_get_issue\",\"arguments\":{\"issueKey\":\"PROJ-1\"}}}\n";
        let mut out = Vec::new();
        serve_lines(&state.router, &scope, input.as_bytes(), &mut out)
            .await
            .unwrap();

        let resps = responses(&out);
        assert_eq!(resps.len(), 1);
        assert_eq!(resps[0]["id"], "a");
        assert!(resps[0].get("error").is_some());
    }
}
