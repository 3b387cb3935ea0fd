// Request orchestration
//
// Per-request flow: resolve the account from its API key, fetch token and
// profile ARN, build the CodeWhisperer body, POST upstream (one auth retry
// inside the client), then dispatch to batch collection or live translation.

use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use std::sync::{Arc, Mutex};

use crate::converters::anthropic_to_kiro::build_codewhisperer_request;
use crate::converters::kiro_to_anthropic::collect_response;
use crate::error::ApiError;
use crate::eventstream::{decode_frames, FrameDecoder};
use crate::models::anthropic::{AnthropicMessagesRequest, AnthropicMessagesResponse};
use crate::routes::AppState;
use crate::sse::error_event;
use crate::streaming::StreamHandler;
use crate::tokenizer::estimate_input_tokens;

/// Resolve an API key to an account name: the store first, then the static
/// config table. Disabled accounts are invisible to the store lookup.
pub fn resolve_account(state: &AppState, api_key: &str) -> Result<String, ApiError> {
    if let Some(account) = state.storage.get_account_by_api_key(api_key) {
        return Ok(account.name);
    }
    if let Some(account) = state.config.static_account_by_api_key(api_key) {
        return Ok(account.name.clone());
    }
    Err(ApiError::Auth("Invalid API key".to_string()))
}

/// Token, ARN, and body preparation shared by both dispatch paths
async fn build_upstream_body(
    state: &AppState,
    account_name: &str,
    request: &AnthropicMessagesRequest,
) -> Result<Value, ApiError> {
    let profile_arn = state
        .token_manager
        .get_profile_arn(account_name)
        .await
        .map_err(|e| ApiError::Credential(format!("{:#}", e)))?;

    let cw_request = build_codewhisperer_request(request, &profile_arn, &state.config.model_mapping)
        .map_err(ApiError::Validation)?;

    serde_json::to_value(&cw_request).map_err(|e| ApiError::Internal(e.into()))
}

// ==================================================================================================
// Batch Path
// ==================================================================================================

pub async fn handle_non_streaming(
    state: &AppState,
    account_name: &str,
    request: &AnthropicMessagesRequest,
) -> Result<AnthropicMessagesResponse, ApiError> {
    let input_tokens = estimate_input_tokens(request);
    let body = build_upstream_body(state, account_name, request).await?;

    let response = state
        .upstream
        .generate_assistant_response(account_name, &body)
        .await?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(ApiError::Upstream {
            status: status.as_u16(),
            message: text,
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Failed to read response body: {}", e)))?;

    let frames = decode_frames(&bytes);
    Ok(collect_response(&frames, &request.model, input_tokens))
}

// ==================================================================================================
// Streaming Path
// ==================================================================================================

/// Live translation of the upstream event stream into Anthropic SSE.
///
/// The stream itself never fails: anything that goes wrong after dispatch is
/// synthesized into an `error` record and the stream ends normally. Dropping
/// the stream drops the upstream response with it, which aborts the
/// underlying connection.
pub fn handle_streaming(
    state: AppState,
    account_name: String,
    request: AnthropicMessagesRequest,
) -> impl Stream<Item = String> + Send {
    stream::once(async move {
        let input_tokens = estimate_input_tokens(&request);

        let body = match build_upstream_body(&state, &account_name, &request).await {
            Ok(body) => body,
            Err(e) => return single_error(e.to_string()),
        };

        let response = match state
            .upstream
            .generate_assistant_response(&account_name, &body)
            .await
        {
            Ok(response) => response,
            Err(e) => return single_error(e.to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return single_error(format!(
                "CodeWhisperer returned status {}: {}",
                status.as_u16(),
                text
            ));
        }

        translate_stream(response, request.model.clone(), input_tokens).boxed()
    })
    .flatten()
}

fn single_error(message: String) -> futures::stream::BoxStream<'static, String> {
    tracing::error!("Streaming request failed: {}", message);
    stream::once(async move { error_event(&message) }).boxed()
}

struct Translator {
    decoder: FrameDecoder,
    handler: StreamHandler,
    failed: bool,
}

fn translate_stream(
    response: reqwest::Response,
    model: String,
    input_tokens: usize,
) -> impl Stream<Item = String> + Send {
    let translator = Arc::new(Mutex::new(Translator {
        decoder: FrameDecoder::new(),
        handler: StreamHandler::new(&model, input_tokens),
        failed: false,
    }));

    let shared = translator.clone();
    let events = response
        .bytes_stream()
        .map(move |chunk_result| {
            let mut t = shared.lock().unwrap();
            if t.failed {
                return Vec::new();
            }
            match chunk_result {
                Ok(chunk) => {
                    let mut out = Vec::new();
                    for payload in t.decoder.feed(&chunk) {
                        t.handler.handle_event(&payload, &mut out);
                    }
                    out
                }
                Err(e) => {
                    tracing::error!("CodeWhisperer stream error: {}", e);
                    t.failed = true;
                    vec![error_event(&format!("Stream error: {}", e))]
                }
            }
        })
        .map(stream::iter)
        .flatten();

    // Closing events once the upstream byte stream is exhausted
    let tail = stream::once(async move {
        let mut t = translator.lock().unwrap();
        let out = if t.failed {
            Vec::new()
        } else {
            t.handler.finish()
        };
        stream::iter(out)
    })
    .flatten();

    events.chain(tail)
}
