//! 流式执行桥：推理任务经回调把事件写入无界 FIFO 通道，消费端按固定间隔轮询转发
//!
//! 状态：Created -> Active -> Joining -> Completing -> Done。
//! - Active：收到事件即转发，Finish / Error 进入 Joining；一次轮询为空则插入 Heartbeat，
//!   若此时任务已结束却没有终止事件，则补一个 Error。
//! - Joining：有限时间等待任务退出（仅清理，超时则分离）。
//! - Completing：恰好输出一个 execution_complete。

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{FutureExt, Stream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::core::AgentError;
use crate::execution::{normalize_worker_error, Event, EventKind};
use crate::react::{AgentAction, ReasoningLoop, TraceHook};
use crate::trace::{classify_action, classify_observation};

#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    /// 消费端轮询间隔；空轮询产生一次 Heartbeat
    pub poll_interval: Duration,
    /// 终止事件之后等待任务退出的上限
    pub join_timeout: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// 把循环回调转成 Action / Observation 事件
struct ChannelHook {
    tx: UnboundedSender<Event>,
    step: AtomicUsize,
}

impl ChannelHook {
    fn send(&self, kind: EventKind) {
        // 消费端已断开时丢弃
        let _ = self.tx.send(Event::new(kind));
    }

    fn steps(&self) -> usize {
        self.step.load(Ordering::SeqCst)
    }
}

impl TraceHook for ChannelHook {
    fn on_agent_action(&self, action: &AgentAction) {
        let step_number = self.step.fetch_add(1, Ordering::SeqCst) + 1;
        let (thought, action) = classify_action(action);
        self.send(EventKind::Action {
            step_number,
            thought,
            action,
        });
    }

    fn on_tool_end(&self, tool: &str, output: &str) {
        self.send(EventKind::Observation {
            step_number: self.steps(),
            observation: classify_observation(tool, output),
        });
    }
}

fn spawn_worker(
    agent: Arc<dyn ReasoningLoop>,
    question: String,
    tx: UnboundedSender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let hook = ChannelHook {
            tx,
            step: AtomicUsize::new(0),
        };
        let start = Instant::now();
        let outcome = AssertUnwindSafe(agent.run(&question, &hook))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(run)) => {
                let total_steps = hook.steps();
                hook.send(EventKind::Summary {
                    execution_time_seconds: start.elapsed().as_secs_f64(),
                    success: true,
                    total_steps,
                });
                hook.send(EventKind::Finish {
                    final_answer: run.output,
                    total_steps,
                });
            }
            Ok(Err(err)) => {
                let err = normalize_worker_error(err);
                tracing::error!(kind = %err.kind(), error = %err.detail(), "Streaming execution failed");
                hook.send(Event::error(&err).kind);
            }
            Err(_) => {
                tracing::error!("Reasoning worker panicked");
                hook.send(Event::error(&AgentError::execution("reasoning worker panicked")).kind);
            }
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Active,
    Joining,
    Completing,
    Done,
}

struct Bridge {
    phase: Phase,
    question: String,
    agent: Option<Arc<dyn ReasoningLoop>>,
    rx: Option<UnboundedReceiver<Event>>,
    worker: Option<JoinHandle<()>>,
    pending: VecDeque<Event>,
    options: StreamOptions,
}

impl Bridge {
    fn new(agent: Arc<dyn ReasoningLoop>, question: &str, options: StreamOptions) -> Self {
        Self {
            phase: Phase::Created,
            question: question.trim().to_string(),
            agent: Some(agent),
            rx: None,
            worker: None,
            pending: VecDeque::new(),
            options,
        }
    }

    async fn next_event(&mut self) -> Option<Event> {
        loop {
            if let Some(ev) = self.pending.pop_front() {
                return Some(ev);
            }
            match self.phase {
                Phase::Created => return Some(self.start()),
                Phase::Active => return Some(self.poll().await),
                Phase::Joining => self.join().await,
                Phase::Completing => {
                    self.phase = Phase::Done;
                    return Some(Event::new(EventKind::Complete {}));
                }
                Phase::Done => return None,
            }
        }
    }

    fn start(&mut self) -> Event {
        let agent = match self.agent.take() {
            Some(agent) if !self.question.is_empty() => agent,
            _ => {
                self.phase = Phase::Completing;
                return Event::error(&AgentError::validation("Question cannot be empty"));
            }
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let execution_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(execution_id = %execution_id, "Streaming execution started");
        self.worker = Some(spawn_worker(agent, self.question.clone(), tx));
        self.rx = Some(rx);
        self.phase = Phase::Active;
        Event::new(EventKind::Start {
            question: self.question.clone(),
            execution_id,
        })
    }

    async fn poll(&mut self) -> Event {
        let Some(rx) = self.rx.as_mut() else {
            self.phase = Phase::Joining;
            return Event::error(&AgentError::execution("event channel missing"));
        };
        match tokio::time::timeout(self.options.poll_interval, rx.recv()).await {
            Ok(Some(ev)) => {
                if ev.is_terminal() {
                    self.phase = Phase::Joining;
                }
                ev
            }
            Ok(None) => {
                self.phase = Phase::Joining;
                Self::missing_terminal()
            }
            Err(_) => {
                if self.worker.as_ref().is_some_and(|w| w.is_finished()) {
                    self.drain_finished();
                }
                Event::new(EventKind::Heartbeat {})
            }
        }
    }

    /// 任务已结束：取出残留事件直到终止事件；没有则补一个 Error
    fn drain_finished(&mut self) {
        self.phase = Phase::Joining;
        if let Some(rx) = self.rx.as_mut() {
            while let Ok(ev) = rx.try_recv() {
                let terminal = ev.is_terminal();
                self.pending.push_back(ev);
                if terminal {
                    return;
                }
            }
        }
        self.pending.push_back(Self::missing_terminal());
    }

    fn missing_terminal() -> Event {
        tracing::warn!("Reasoning worker exited without a terminal event");
        Event::error(&AgentError::execution("reasoning worker exited without a result"))
    }

    async fn join(&mut self) {
        self.rx = None;
        if let Some(handle) = self.worker.take() {
            match tokio::time::timeout(self.options.join_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Reasoning worker join failed"),
                Err(_) => tracing::warn!("Reasoning worker still running after join timeout, detaching"),
            }
        }
        self.phase = Phase::Completing;
    }
}

/// 启动一次流式执行；返回的流总以 (Finish | Error) -> Complete 结尾，Complete 恰好一次
pub fn stream_execution(
    agent: Arc<dyn ReasoningLoop>,
    question: &str,
    options: StreamOptions,
) -> impl Stream<Item = Event> + Send + 'static {
    let bridge = Bridge::new(agent, question, options);
    futures_util::stream::unfold(bridge, |mut bridge| async move {
        bridge.next_event().await.map(|ev| (ev, bridge))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::StreamExt;

    use crate::core::ErrorKind;
    use crate::react::{AgentFinish, AgentRun};

    struct TwoSteps;

    #[async_trait]
    impl ReasoningLoop for TwoSteps {
        async fn run(&self, _q: &str, hook: &dyn TraceHook) -> Result<AgentRun, AgentError> {
            let action = AgentAction::new("sql_db_list_tables", "", "Thought: look at tables first");
            hook.on_agent_action(&action);
            hook.on_tool_end("sql_db_list_tables", "users");
            hook.on_agent_finish(&AgentFinish {
                output: "users".into(),
                log: String::new(),
            });
            Ok(AgentRun {
                output: "users".into(),
                intermediate_steps: vec![(action, "users".into())],
            })
        }
    }

    struct Fails;

    #[async_trait]
    impl ReasoningLoop for Fails {
        async fn run(&self, _q: &str, _hook: &dyn TraceHook) -> Result<AgentRun, AgentError> {
            Err(crate::llm::LlmError::RateLimited { retry_after_ms: 1 }.into())
        }
    }

    struct Panics;

    #[async_trait]
    impl ReasoningLoop for Panics {
        async fn run(&self, _q: &str, _hook: &dyn TraceHook) -> Result<AgentRun, AgentError> {
            panic!("boom")
        }
    }

    fn fast() -> StreamOptions {
        StreamOptions {
            poll_interval: Duration::from_millis(20),
            join_timeout: Duration::from_secs(1),
        }
    }

    fn types(events: &[Event]) -> Vec<&'static str> {
        events
            .iter()
            .map(|e| e.event_type())
            .filter(|t| *t != "heartbeat")
            .collect()
    }

    #[tokio::test]
    async fn test_stream_success_order() {
        let events: Vec<Event> = stream_execution(Arc::new(TwoSteps), "tables?", fast()).collect().await;
        assert_eq!(
            types(&events),
            vec![
                "execution_start",
                "agent_action",
                "agent_observation",
                "execution_summary",
                "agent_finish",
                "execution_complete",
            ]
        );
        match &events.iter().find(|e| e.event_type() == "agent_action").unwrap().kind {
            EventKind::Action { step_number, thought, .. } => {
                assert_eq!(*step_number, 1);
                assert_eq!(thought.as_deref(), Some("look at tables first"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_error_order() {
        let events: Vec<Event> = stream_execution(Arc::new(Fails), "q?", fast()).collect().await;
        assert_eq!(types(&events), vec!["execution_start", "agent_error", "execution_complete"]);
        match &events[events.len() - 2].kind {
            EventKind::Error { kind, .. } => assert_eq!(*kind, ErrorKind::UpstreamRateLimit),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_panicking_worker_still_completes() {
        let events: Vec<Event> = stream_execution(Arc::new(Panics), "q?", fast()).collect().await;
        assert_eq!(types(&events), vec!["execution_start", "agent_error", "execution_complete"]);
    }

    #[tokio::test]
    async fn test_stream_blank_question() {
        let events: Vec<Event> = stream_execution(Arc::new(TwoSteps), "   ", fast()).collect().await;
        assert_eq!(types(&events), vec!["agent_error", "execution_complete"]);
        match &events[0].kind {
            EventKind::Error { kind, .. } => assert_eq!(*kind, ErrorKind::ValidationFailure),
            other => panic!("unexpected {other:?}"),
        }
    }
}
