//! Scripted command runner for tests
//!
//! Replays canned outputs keyed by argv prefix and records every command it
//! was asked to run. Unscripted programs behave like a missing binary.

use crate::domain::ports::{CommandOutput, CommandRunner, CommandSpec, PipelineOutput};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

struct Rule {
    prefix: Vec<String>,
    /// Played in order; the last one repeats
    responses: VecDeque<CommandOutput>,
}

#[derive(Default)]
pub(crate) struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a response for commands whose argv starts with `prefix`
    pub(crate) fn on(&self, prefix: &[&str], output: CommandOutput) -> &Self {
        let prefix: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
        let mut rules = self.rules.lock();
        match rules.iter_mut().find(|r| r.prefix == prefix) {
            Some(rule) => rule.responses.push_back(output),
            None => rules.push(Rule {
                prefix,
                responses: VecDeque::from([output]),
            }),
        }
        self
    }

    /// Every command run so far, rendered for display
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().iter().map(ToString::to_string).collect()
    }

    /// How many commands started with `prefix`
    pub(crate) fn count(&self, prefix: &[&str]) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches_prefix(c, prefix))
            .count()
    }

    fn respond(&self, command: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().push(command.clone());

        let mut rules = self.rules.lock();
        let rule = rules
            .iter_mut()
            .filter(|r| {
                let prefix: Vec<&str> = r.prefix.iter().map(String::as_str).collect();
                matches_prefix(command, &prefix)
            })
            .max_by_key(|r| r.prefix.len())
            .ok_or_else(|| Error::CommandUnavailable {
                program: command.program.clone(),
            })?;

        if rule.responses.len() > 1 {
            rule.responses
                .pop_front()
                .ok_or_else(|| Error::Internal("empty script".into()))
        } else {
            rule.responses
                .front()
                .cloned()
                .ok_or_else(|| Error::Internal("empty script".into()))
        }
    }
}

fn matches_prefix(command: &CommandSpec, prefix: &[&str]) -> bool {
    let argv = command.argv();
    argv.len() >= prefix.len() && argv.iter().zip(prefix).all(|(a, p)| a == p)
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        self.respond(command)
    }

    async fn pipe(&self, producer: &CommandSpec, consumer: &CommandSpec) -> Result<PipelineOutput> {
        Ok(PipelineOutput {
            producer: self.respond(producer)?,
            consumer: self.respond(consumer)?,
        })
    }
}

/// One `zpool list -H -p` record for a healthy pool
pub(crate) fn zpool_line(name: &str) -> String {
    format!("{}\t10737418240\t1073741824\t9663676416\t10\tONLINE\t1.00\t1\n", name)
}
