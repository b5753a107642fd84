use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;

use deskagent_context::{estimate_tokens, Compactor};
use deskagent_core::{
    validate_tool_messages, AgentError, AgentIO, Message, RunHandle, ToolCallAccumulator,
    UiEvent,
};
use deskagent_llm::{ChatCompletion, ChatOptions, LlmChunk, LlmError, ToolChoice};
use deskagent_tools::{groups, validate_args, ExecutionPolicy, ToolContext};

use crate::config::{AgentDeps, AgentRunConfig};
use crate::planner::{PlanOutcome, Planner};
use crate::prompt::{build_system_prompt, build_turn_envelope};
use crate::recovery::{
    detect_malformed_tool_markup, parse_failure_feedback, parse_tool_arguments,
    rollback_last_tool_group, sanitize_tool_name, schema_failure_feedback,
    ARGUMENT_FAILURE_LIMIT, FINAL_RESPONSE_FAILURE_LIMIT, FINAL_RESPONSE_TOOL,
    MALFORMED_TOOL_CALL_FEEDBACK, MISSING_TOOL_CALL_FEEDBACK, MODEL_JSON_INCAPABLE_MESSAGE,
    NO_TOOL_CALL_LIMIT, SOFT_ITERATION_LIMIT, WRAP_UP_PROMPT,
};
use crate::result::{strip_parse_failure_turns, AgentRunResult};

const QUOTA_EXCEEDED_MESSAGE: &str = "LLM 사용량 한도를 초과했습니다. 구독 또는 크레딧을 확인해 \
주세요. (LLM quota exceeded - please check your subscription or credits.)";

/// Working set of one run: the validated base history, the current user
/// request and the messages produced inside the loop.
struct LoopState {
    valid_history: Vec<Message>,
    user_message: Message,
    tool_loop: Vec<Message>,
    /// Tool-call ids whose results were argument-failure hints; stripped
    /// from the returned history.
    hint_call_ids: HashSet<String>,
}

impl LoopState {
    fn full_conversation(&self) -> Vec<Message> {
        let mut messages = self.valid_history.clone();
        messages.push(self.user_message.clone());
        messages.extend(self.tool_loop.iter().cloned());
        messages
    }

    fn returned_messages(&self) -> Vec<Message> {
        let mut messages = self.valid_history.clone();
        messages.push(self.user_message.clone());
        messages.extend(strip_parse_failure_turns(
            self.tool_loop.clone(),
            &self.hint_call_ids,
        ));
        messages
    }
}

/// Run one agent task to completion.
///
/// Always returns a result: a user abort is surfaced as `success: true` with
/// an `[ABORTED BY USER]` tail, never as an error.
pub async fn run_agent(
    user_message: impl Into<String>,
    existing_history: Vec<Message>,
    deps: AgentDeps,
    config: AgentRunConfig,
) -> AgentRunResult {
    if let Some(working_directory) = &config.working_directory {
        deps.state.set_working_directory(working_directory);
    }

    let handle = deps.state.begin_run(!config.resume_todos);
    let session_wd = deps.state.working_directory();
    log::info!(
        "Starting agent run #{} (planning: {}, auto: {}, wd: {})",
        handle.run_id(),
        config.enable_planning,
        config.auto_mode,
        session_wd.display()
    );

    let mut ls = LoopState {
        valid_history: validate_tool_messages(&existing_history),
        user_message: Message::user(user_message.into()),
        tool_loop: Vec::new(),
        hint_call_ids: HashSet::new(),
    };

    let outcome = drive(&deps, &config, &handle, &mut ls).await;
    deps.state.finish_run();

    match outcome {
        Ok(result) => result,
        Err(AgentError::Aborted) => {
            log::info!("Agent run #{} aborted by user", handle.run_id());
            ls.tool_loop
                .push(Message::assistant("[ABORTED BY USER]", None));
            AgentRunResult {
                success: true,
                response: String::new(),
                error: None,
                messages: ls.returned_messages(),
            }
        }
        Err(error) => {
            let message = error.to_string();
            deps.io
                .broadcast(UiEvent::Error {
                    message: message.clone(),
                })
                .await;
            AgentRunResult {
                success: false,
                response: message.clone(),
                error: Some(message),
                messages: ls.returned_messages(),
            }
        }
    }
}

async fn drive(
    deps: &AgentDeps,
    config: &AgentRunConfig,
    handle: &RunHandle,
    ls: &mut LoopState,
) -> Result<AgentRunResult, AgentError> {
    let cancel = handle.cancel_token();

    // Planning phase.
    if config.enable_planning && !config.resume_todos && deps.state.todos().is_empty() {
        let planner = Planner::new(Arc::clone(&deps.llm), Arc::clone(&deps.io));
        match planner
            .plan(
                &deps.registry,
                handle,
                &ls.user_message.content,
                &ls.valid_history,
                config,
            )
            .await
        {
            Ok(PlanOutcome::Direct(response)) => {
                deps.io
                    .broadcast(UiEvent::Complete {
                        response: response.clone(),
                    })
                    .await;
                let mut messages = ls.valid_history.clone();
                messages.push(ls.user_message.clone());
                messages.push(Message::assistant(response.clone(), None));
                return Ok(AgentRunResult::succeeded(response, messages));
            }
            Ok(PlanOutcome::Plan {
                todos,
                title,
                complexity,
                clarifications,
            }) => {
                log::info!(
                    "Planned {} todo(s), complexity {complexity:?}",
                    todos.len()
                );
                deps.state.set_todos(todos);
                ls.valid_history.extend(clarifications);
                deps.io
                    .broadcast(UiEvent::TodoUpdate {
                        todos: deps.state.todos(),
                    })
                    .await;
                deps.io.broadcast(UiEvent::SessionTitle { title }).await;
                deps.io.show_task_window().await;
            }
            // Non-fatal: proceed with an empty todo list.
            Err(error) => {
                log::warn!("Planner failed, continuing without a plan: {error}");
            }
        }
    }

    let compactor = Compactor::new(Arc::clone(&deps.llm));

    let mut iteration: u32 = 0;
    let mut no_tool_call_retries: u32 = 0;
    let mut argument_failures: u32 = 0;
    let mut final_response_failures: u32 = 0;
    let mut compact_retried = false;
    let mut soft_limit_notified = false;

    while deps.state.is_running() && !cancel.is_cancelled() {
        iteration += 1;

        // Soft limit: nudge once, never terminate by itself.
        if iteration >= SOFT_ITERATION_LIMIT && !soft_limit_notified {
            ls.tool_loop.push(Message::user(WRAP_UP_PROMPT));
            soft_limit_notified = true;
            log::warn!("Iteration {iteration} reached the soft limit, asking the model to wrap up");
        }

        // Rebuild the two-message request from current state.
        let working_directory = deps.state.working_directory();
        let system_prompt = build_system_prompt(&deps.registry, &working_directory);
        let envelope = build_turn_envelope(
            &deps.state.todos(),
            &ls.valid_history,
            &ls.user_message,
            &ls.tool_loop,
            deps.registry.is_group_enabled(groups::VISION),
        );
        let request = vec![Message::user(envelope)];
        let tools = deps.registry.list_schemas();
        let options = ChatOptions {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_output_tokens,
            tool_choice: Some(ToolChoice::Required),
            cancel: cancel.clone(),
        };

        let completion =
            match request_completion(deps, config, &system_prompt, &request, &tools, &options)
                .await
            {
                Ok(completion) => completion,
                Err(LlmError::Cancelled) => return Err(AgentError::Aborted),
                Err(LlmError::ContextLength(detail)) => {
                    if compact_retried {
                        log::error!("Context length exceeded twice, abandoning run: {detail}");
                        return Ok(AgentRunResult::failed(
                            "Context length exceeded and recovery was already attempted.",
                            ls.returned_messages(),
                        ));
                    }
                    log::warn!("Context length exceeded, rolling back last tool group: {detail}");
                    rollback_last_tool_group(&mut ls.tool_loop);
                    compact_retried = true;
                    continue;
                }
                Err(LlmError::QuotaExceeded(detail)) => {
                    log::error!("Quota exceeded: {detail}");
                    deps.io
                        .broadcast(UiEvent::Error {
                            message: QUOTA_EXCEEDED_MESSAGE.to_string(),
                        })
                        .await;
                    return Ok(AgentRunResult::failed(
                        QUOTA_EXCEEDED_MESSAGE,
                        ls.returned_messages(),
                    ));
                }
                Err(error) => return Err(AgentError::Llm(error.to_string())),
            };

        if let Some(reasoning) = &completion.reasoning_content {
            if !reasoning.is_empty() && !config.stream_response {
                deps.io
                    .broadcast(UiEvent::Reasoning {
                        content: reasoning.clone(),
                        done: true,
                    })
                    .await;
            }
        }

        // No tool calls at all: count, correct, retry.
        if completion.tool_calls.is_empty() {
            let mut assistant = Message::assistant(completion.content.clone(), None);
            assistant.reasoning_content = completion.reasoning_content.clone();
            ls.tool_loop.push(assistant);

            no_tool_call_retries += 1;
            if no_tool_call_retries > NO_TOOL_CALL_LIMIT {
                let response = if completion.content.is_empty() {
                    "Task completed.".to_string()
                } else {
                    completion.content.clone()
                };
                deps.io
                    .broadcast(UiEvent::Complete {
                        response: response.clone(),
                    })
                    .await;
                return Ok(AgentRunResult::succeeded(response, ls.returned_messages()));
            }

            let feedback = if detect_malformed_tool_markup(&completion.content) {
                MALFORMED_TOOL_CALL_FEEDBACK
            } else {
                MISSING_TOOL_CALL_FEEDBACK
            };
            ls.tool_loop.push(Message::user(feedback));
            continue;
        }

        // Single tool per turn: truncate extra calls before recording.
        let mut call = completion.tool_calls[0].clone();
        if completion.tool_calls.len() > 1 {
            log::warn!(
                "Model emitted {} tool calls in one turn; keeping only '{}'",
                completion.tool_calls.len(),
                call.function.name
            );
        }

        match sanitize_tool_name(&call.function.name) {
            Some(name) => call.function.name = name,
            None => {
                let mut assistant =
                    Message::assistant(completion.content.clone(), Some(vec![call.clone()]));
                assistant.reasoning_content = completion.reasoning_content.clone();
                ls.tool_loop.push(assistant);

                argument_failures += 1;
                ls.hint_call_ids.insert(call.id.clone());
                if argument_failures >= ARGUMENT_FAILURE_LIMIT {
                    return abort_for_bad_arguments(deps, ls).await;
                }
                ls.tool_loop.push(Message::tool_result(
                    call.id.clone(),
                    schema_failure_feedback("the tool name was empty or unparseable"),
                ));
                continue;
            }
        }

        let mut assistant =
            Message::assistant(completion.content.clone(), Some(vec![call.clone()]));
        assistant.reasoning_content = completion.reasoning_content.clone();
        ls.tool_loop.push(assistant);

        // Arguments: parse, then validate against the schema.
        let args = match parse_tool_arguments(&call.function.arguments) {
            Ok(args) => args,
            Err(parse_error) => {
                argument_failures += 1;
                ls.hint_call_ids.insert(call.id.clone());
                if argument_failures >= ARGUMENT_FAILURE_LIMIT {
                    return abort_for_bad_arguments(deps, ls).await;
                }
                ls.tool_loop.push(Message::tool_result(
                    call.id.clone(),
                    parse_failure_feedback(&call.function.arguments, &parse_error),
                ));
                continue;
            }
        };

        if let Some(definition) = deps.registry.definition(&call.function.name) {
            if let Err(hint) = validate_args(&definition, &args) {
                argument_failures += 1;
                ls.hint_call_ids.insert(call.id.clone());
                if argument_failures >= ARGUMENT_FAILURE_LIMIT {
                    return abort_for_bad_arguments(deps, ls).await;
                }
                ls.tool_loop.push(Message::tool_result(
                    call.id.clone(),
                    schema_failure_feedback(&hint),
                ));
                continue;
            }
        }

        // A call that parses and validates re-arms the strike counter.
        argument_failures = 0;

        deps.io
            .broadcast(UiEvent::ToolCall {
                tool_call_id: call.id.clone(),
                tool_name: call.function.name.clone(),
                arguments: args.clone(),
            })
            .await;

        let ctx = ToolContext {
            working_directory: working_directory.clone(),
            cancel: cancel.clone(),
            io: Arc::clone(&deps.io),
            handle: handle.clone(),
        };
        let outcome = deps
            .executor
            .execute(
                &call,
                &args,
                &ctx,
                ExecutionPolicy {
                    auto_mode: config.auto_mode,
                },
            )
            .await;

        if cancel.is_cancelled() {
            return Err(AgentError::Aborted);
        }

        // Terminal tool.
        if call.function.name == FINAL_RESPONSE_TOOL {
            if outcome.is_final_response() {
                let response = outcome.result.clone().unwrap_or_default();
                ls.tool_loop
                    .push(Message::tool_result(call.id.clone(), response.clone()));
                deps.io
                    .broadcast(UiEvent::ToolResult {
                        tool_call_id: call.id.clone(),
                        tool_name: call.function.name.clone(),
                        success: true,
                        result: response.clone(),
                    })
                    .await;
                deps.io
                    .broadcast(UiEvent::Complete {
                        response: response.clone(),
                    })
                    .await;
                return Ok(AgentRunResult::succeeded(response, ls.returned_messages()));
            }

            final_response_failures += 1;
            if final_response_failures >= FINAL_RESPONSE_FAILURE_LIMIT {
                // Salvage the answer the model was trying to deliver.
                let response = args
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Task completed.")
                    .to_string();
                log::warn!("final_response failed {final_response_failures} times, synthesizing completion");
                ls.tool_loop
                    .push(Message::tool_result(call.id.clone(), response.clone()));
                deps.io
                    .broadcast(UiEvent::Complete {
                        response: response.clone(),
                    })
                    .await;
                return Ok(AgentRunResult::succeeded(response, ls.returned_messages()));
            }
        }

        // Normalize and append the result.
        let result_text = if outcome.success {
            match &outcome.result {
                Some(result) if !result.is_empty() => result.clone(),
                _ => "(no output)".to_string(),
            }
        } else {
            format!(
                "Error: {}",
                outcome.error.as_deref().unwrap_or("unknown error")
            )
        };
        ls.tool_loop
            .push(Message::tool_result(call.id.clone(), result_text.clone()));
        deps.io
            .broadcast(UiEvent::ToolResult {
                tool_call_id: call.id.clone(),
                tool_name: call.function.name.clone(),
                success: outcome.success,
                result: result_text,
            })
            .await;

        // Context accounting and preventative compaction.
        let conversation = ls.full_conversation();
        let should_compact = {
            let mut tracker = match deps.tracker.lock() {
                Ok(tracker) => tracker,
                Err(poisoned) => poisoned.into_inner(),
            };
            tracker.record(completion.usage.as_ref(), &system_prompt, &conversation);
            tracker.should_trigger_auto_compact(config.context_window)
        };

        if should_compact {
            match compactor
                .compact(
                    &conversation,
                    &working_directory,
                    &config.model,
                    cancel.clone(),
                )
                .await
            {
                Ok(compacted) => {
                    log::info!(
                        "Preventative compaction replaced {} message(s)",
                        compacted.messages_compacted
                    );
                    ls.valid_history =
                        vec![compacted.replacement.0, compacted.replacement.1];
                    ls.tool_loop.clear();
                    ls.hint_call_ids.clear();

                    let fresh = estimate_tokens(&system_prompt, &ls.full_conversation());
                    let usage = {
                        let mut tracker = match deps.tracker.lock() {
                            Ok(tracker) => tracker,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        tracker.reset(fresh);
                        tracker.usage(config.context_window)
                    };
                    deps.io.broadcast(UiEvent::ContextUpdate { usage }).await;
                }
                // The tracker's one-shot flag keeps this from retrying
                // immediately.
                Err(error) => log::warn!("Auto-compact failed: {error}"),
            }
        } else {
            let usage = {
                let tracker = match deps.tracker.lock() {
                    Ok(tracker) => tracker,
                    Err(poisoned) => poisoned.into_inner(),
                };
                tracker.usage(config.context_window)
            };
            deps.io.broadcast(UiEvent::ContextUpdate { usage }).await;
        }
    }

    Err(AgentError::Aborted)
}

async fn abort_for_bad_arguments(
    deps: &AgentDeps,
    ls: &mut LoopState,
) -> Result<AgentRunResult, AgentError> {
    log::error!("Model produced invalid tool arguments three times in a row, giving up");
    ls.tool_loop
        .push(Message::assistant(MODEL_JSON_INCAPABLE_MESSAGE, None));
    deps.io
        .broadcast(UiEvent::Error {
            message: MODEL_JSON_INCAPABLE_MESSAGE.to_string(),
        })
        .await;
    Ok(AgentRunResult::failed(
        MODEL_JSON_INCAPABLE_MESSAGE,
        ls.returned_messages(),
    ))
}

/// Issue the per-iteration LLM request, buffered or streaming per config.
async fn request_completion(
    deps: &AgentDeps,
    config: &AgentRunConfig,
    system_prompt: &str,
    messages: &[Message],
    tools: &[deskagent_core::ToolSchema],
    options: &ChatOptions,
) -> Result<ChatCompletion, LlmError> {
    if !config.stream_response {
        let completion = deps.llm.chat(system_prompt, messages, tools, options).await?;
        if !completion.content.is_empty() {
            deps.io
                .broadcast(UiEvent::Message {
                    role: "assistant".to_string(),
                    content: completion.content.clone(),
                })
                .await;
        }
        return Ok(completion);
    }

    let mut stream = deps
        .llm
        .chat_stream(system_prompt, messages, tools, options)
        .await?;

    let mut content = String::new();
    let mut reasoning = String::new();
    let mut accumulator = ToolCallAccumulator::new();
    let mut usage = None;

    while let Some(chunk) = stream.next().await {
        if options.cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }

        match chunk? {
            LlmChunk::Token(token) => {
                if !token.is_empty() {
                    content.push_str(&token);
                    deps.io
                        .broadcast(UiEvent::Message {
                            role: "assistant".to_string(),
                            content: token,
                        })
                        .await;
                }
            }
            LlmChunk::Reasoning(delta) => {
                reasoning.push_str(&delta);
                deps.io
                    .broadcast(UiEvent::Reasoning {
                        content: delta,
                        done: false,
                    })
                    .await;
            }
            LlmChunk::ToolCalls(calls) => accumulator.extend(calls),
            LlmChunk::Usage(chunk_usage) => usage = Some(chunk_usage),
            LlmChunk::Done => {}
        }
    }

    if !reasoning.is_empty() {
        deps.io
            .broadcast(UiEvent::Reasoning {
                content: String::new(),
                done: true,
            })
            .await;
    }

    Ok(ChatCompletion {
        content,
        reasoning_content: if reasoning.is_empty() {
            None
        } else {
            Some(reasoning)
        },
        tool_calls: accumulator.finalize(),
        usage,
    })
}
