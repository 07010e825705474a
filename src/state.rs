use std::str::{FromStr, SplitWhitespace};

use crate::error::{Result, StateError};
use crate::hardware::Hardware;
use crate::label::CodeLabel;
use crate::stack::{CpuStack, NUM_GLOBAL_STACKS, NUM_LOCAL_STACKS, STACK_DEPTH};
use crate::thread::{MAX_THREAD_IDS, NUM_HEADS, ThreadContext, ThreadIdChart};

const HEADER: &str = "SmtHardware";
const HEAD_MARKER: &str = "|";

/// Whitespace token reader over a checkpoint.
struct Tokens<'a>(SplitWhitespace<'a>);

impl<'a> Tokens<'a> {
    fn new(text: &'a str) -> Self {
        Self(text.split_whitespace())
    }

    fn next(&mut self) -> std::result::Result<&'a str, StateError> {
        self.0.next().ok_or(StateError::UnexpectedEnd)
    }

    fn parse<T: FromStr>(&mut self, expected: &'static str) -> std::result::Result<T, StateError> {
        let token = self.next()?;
        token.parse().map_err(|_| StateError::BadToken {
            found: token.to_string(),
            expected,
        })
    }

    fn literal(&mut self, literal: &'static str) -> std::result::Result<(), StateError> {
        let token = self.next()?;
        if token != literal {
            return Err(StateError::BadToken {
                found: token.to_string(),
                expected: literal,
            });
        }
        Ok(())
    }

    fn label(&mut self) -> std::result::Result<CodeLabel, StateError> {
        let token = self.next()?;
        CodeLabel::parse(token).ok_or_else(|| StateError::BadToken {
            found: token.to_string(),
            expected: "label",
        })
    }

    fn stack(&mut self) -> std::result::Result<CpuStack, StateError> {
        let mut stack = CpuStack::new();
        for _ in 0..STACK_DEPTH {
            stack.push(self.parse("stack value")?);
        }
        Ok(stack)
    }
}

fn stack_line(stack: &CpuStack) -> String {
    let values: Vec<String> = stack.bottom_up().map(|v| v.to_string()).collect();
    values.join(" ")
}

impl Hardware {
    /// Flat text checkpoint of the stacks, thread heads and label registers.
    ///
    /// Stacks are written deepest entry first so a reload pushes them back in
    /// order. Heads keep their raw position only; memory is not part of the
    /// checkpoint.
    pub fn save_state(&self) -> String {
        let mut lines = vec![HEADER.to_string()];
        lines.extend(self.global_stacks.iter().map(stack_line));
        lines.push(format!("{} {}", self.threads.len(), self.cur_thread));
        for thread in &self.threads {
            lines.push(thread.id.to_string());
            lines.extend(thread.stacks.iter().map(stack_line));
            let positions: Vec<String> = thread
                .heads
                .iter()
                .map(|h| h.position().to_string())
                .collect();
            lines.push(format!(
                "{} {HEAD_MARKER} {} {} {}",
                positions.join(" "),
                thread.cur_head,
                thread.read_label,
                thread.next_label,
            ));
        }
        let mut text = lines.join("\n");
        text.push('\n');
        text
    }

    /// Restore a checkpoint written by [`Hardware::save_state`].
    ///
    /// The whole text is parsed before anything is replaced, so a malformed
    /// checkpoint leaves the hardware untouched. Restored threads start in the
    /// main space.
    pub fn load_state(&mut self, text: &str) -> Result<()> {
        let mut tokens = Tokens::new(text);
        if tokens.next().ok() != Some(HEADER) {
            return Err(StateError::MissingHeader(HEADER).into());
        }

        let mut global_stacks: [CpuStack; NUM_GLOBAL_STACKS] = Default::default();
        for stack in &mut global_stacks {
            *stack = tokens.stack()?;
        }

        let num_threads: usize = tokens.parse("thread count")?;
        if num_threads == 0 {
            return Err(StateError::NoThreads.into());
        }
        if num_threads > self.config.max_threads.min(MAX_THREAD_IDS) {
            return Err(StateError::BadToken {
                found: num_threads.to_string(),
                expected: "thread count",
            }
            .into());
        }
        let cur_thread: usize = tokens.parse("current thread")?;
        if cur_thread >= num_threads {
            return Err(StateError::BadToken {
                found: cur_thread.to_string(),
                expected: "current thread",
            }
            .into());
        }

        let mut ids = ThreadIdChart::default();
        let mut threads = Vec::with_capacity(num_threads);
        for _ in 0..num_threads {
            let id: usize = tokens.parse("thread id")?;
            if id >= MAX_THREAD_IDS || ids.contains(id) {
                return Err(StateError::BadToken {
                    found: id.to_string(),
                    expected: "unique thread id",
                }
                .into());
            }
            ids.mark(id);

            let mut thread = ThreadContext::new(id, self.id, 0);
            for stack in thread.stacks.iter_mut().take(NUM_LOCAL_STACKS) {
                *stack = tokens.stack()?;
            }
            for head in thread.heads.iter_mut() {
                head.abs_set(tokens.parse("head position")?);
            }
            tokens.literal(HEAD_MARKER)?;
            let cur_head: usize = tokens.parse("current head")?;
            if cur_head >= NUM_HEADS {
                return Err(StateError::BadToken {
                    found: cur_head.to_string(),
                    expected: "current head",
                }
                .into());
            }
            thread.cur_head = cur_head;
            thread.read_label = tokens.label()?;
            thread.next_label = tokens.label()?;
            threads.push(thread);
        }

        self.global_stacks = global_stacks;
        self.threads = threads;
        self.thread_ids = ids;
        self.cur_thread = cur_thread;
        Ok(())
    }
}
