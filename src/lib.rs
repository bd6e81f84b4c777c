//! Rikki: agent turn execution engine
//!
//! Consumes a model's streamed text, extracts XML-style tool calls as they arrive, and
//! dispatches them through a gate that stages file mutations and risky shell commands for
//! user approval instead of running them. Approved changes and commands are applied through
//! the [`pending::PendingRegistry`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use rikki::prelude::*;
//!
//! # async fn example() -> rikki::error::Result<()> {
//! let config = EngineConfig::load()?;
//! let gate = Arc::new(ToolDispatchGate::new(
//!     ToolRegistry::with_builtins(),
//!     Arc::new(PendingRegistry::from_config(&config.tools)),
//!     config.tools.clone(),
//! ));
//! let runner = TurnRunner::new(gate, config);
//!
//! let (transport, tx) = ChannelTransport::new(64);
//! tx.send(Ok(TextStreamDelta::text("Reading it now. <read filePath=\"README.md\"></read>")))
//!     .await
//!     .ok();
//! tx.send(Ok(TextStreamDelta::done(FinishReason::ToolCalls))).await.ok();
//!
//! let request = TurnRequest::builder()
//!     .session_id("ses_1")
//!     .workspace_root("/path/to/project")
//!     .build();
//! let report = runner.run(request, Arc::new(transport)).await?;
//! println!("{:?}", report.outcome.next);
//! # Ok(())
//! # }
//! ```

pub mod agent_loop;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod pending;
pub mod prelude;
pub mod risk;
pub mod shell;
pub mod tools;
pub mod types;
pub mod util;
pub mod workspace;
