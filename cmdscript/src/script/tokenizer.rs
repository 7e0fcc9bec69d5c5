//! Bracket tokenizer, call stack and skip state.
//!
//! A script is a sequence of nested `(name args... (child ...) ...)` blocks.
//! The tokenizer never builds a tree: each [`Tokenizer::next_token`] call
//! yields one OPEN or CLOSE event and the engine reacts to it immediately.
//!
//! Conditional execution is driven by [`SkipState`].  While it is
//! `Skipping`, the sibling block reached with `remaining == 1` at the
//! conditional's own depth is consumed structurally: brackets are counted
//! but no token is produced, so nothing inside it is ever dispatched.

use tracing::trace;

use crate::error::{Error, Result};

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub name: String,
    pub kind: TokenKind,
}

// ── SkipState ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SkipState {
    #[default]
    Normal,
    /// Count `remaining` sibling blocks at call-stack depth `depth`; the one
    /// reached while `remaining == 1` is skipped.
    Skipping { depth: usize, remaining: u8 },
}

impl SkipState {
    /// Should the block about to start at stack depth `depth` be skipped?
    pub fn skips_at(self, depth: usize) -> bool {
        matches!(self, SkipState::Skipping { depth: d, remaining: 1 } if d == depth)
    }

    /// Account for a block ending, with the stack at `depth` afterwards.
    ///
    /// Returns the new state; `Normal` once the count runs out or the
    /// conditional's own command has closed.
    pub fn block_ended(self, depth: usize) -> SkipState {
        match self {
            SkipState::Skipping { depth: d, remaining } if depth == d => {
                if remaining <= 1 {
                    SkipState::Normal
                } else {
                    SkipState::Skipping {
                        depth: d,
                        remaining: remaining - 1,
                    }
                }
            }
            SkipState::Skipping { depth: d, .. } if depth < d => SkipState::Normal,
            other => other,
        }
    }
}

// ── Tokenizer ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Tokenizer {
    /// Private newline-normalized copy of the script.
    text: String,
    cursor: usize,
    stack: Vec<String>,
    skip: SkipState,
    /// Enclosing conditionals' states, resumed when the active one finishes.
    suspended: Vec<SkipState>,
}

impl Tokenizer {
    pub fn new(script: &str) -> Self {
        Tokenizer {
            text: script.replace("\r\n", "\n").replace('\r', "\n"),
            cursor: 0,
            stack: Vec::new(),
            skip: SkipState::Normal,
            suspended: Vec::new(),
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn at_end(&self) -> bool {
        self.cursor >= self.text.len()
    }

    pub fn stack(&self) -> &[String] {
        &self.stack
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn push(&mut self, name: &str) {
        self.stack.push(name.to_owned());
    }

    pub fn skip_state(&self) -> SkipState {
        self.skip
    }

    /// Start a conditional at the current depth.  An active conditional is
    /// suspended until this one finishes.
    pub fn begin_skip(&mut self, remaining: u8) {
        if self.skip != SkipState::Normal {
            self.suspended.push(self.skip);
        }
        self.skip = SkipState::Skipping {
            depth: self.depth(),
            remaining,
        };
    }

    /// A block ended with the stack at its current depth.  When the active
    /// conditional finishes, the enclosing one resumes and sees the same
    /// event: the inner `if` closing may itself end one of its siblings.
    fn end_block(&mut self) {
        let depth = self.depth();
        self.skip = self.skip.block_ended(depth);
        while self.skip == SkipState::Normal {
            match self.suspended.pop() {
                Some(outer) => self.skip = outer.block_ended(depth),
                None => break,
            }
        }
    }

    /// Argument text of the command just opened: from the cursor up to the
    /// next bracket.
    pub fn arg_text(&self) -> &str {
        let rest = &self.text[self.cursor..];
        let end = rest.find(&['(', ')'][..]).unwrap_or(rest.len());
        &rest[..end]
    }

    /// Produce the next token, or `None` at end of script.
    pub fn next_token(&mut self) -> Result<Option<Token>> {
        loop {
            if self.skip.skips_at(self.depth()) && self.skip_block() {
                self.end_block();
                continue;
            }

            let rest = &self.text[self.cursor..];
            let open = rest.find('(');
            let close = rest.find(')');

            match (open, close) {
                (_, Some(c)) if open.map_or(true, |o| c < o) => {
                    let offset = self.cursor + c;
                    let Some(name) = self.stack.pop() else {
                        return Err(Error::UnmatchedCloseBracket { offset });
                    };
                    self.cursor = offset + 1;
                    self.end_block();
                    return Ok(Some(Token {
                        name,
                        kind: TokenKind::Close,
                    }));
                }
                (Some(o), _) => {
                    let start = self.cursor + o + 1;
                    let len = self.text[start..]
                        .find(|c: char| c.is_ascii_whitespace() || c == '(' || c == ')')
                        .unwrap_or(self.text.len() - start);
                    self.cursor = start + len;
                    return Ok(Some(Token {
                        name: self.text[start..start + len].to_owned(),
                        kind: TokenKind::Open,
                    }));
                }
                _ => {
                    self.cursor = self.text.len();
                    return Ok(None);
                }
            }
        }
    }

    /// Consume one balanced block starting at the next `(`.
    ///
    /// Returns `false` (consuming nothing but leading text) when a `)` comes
    /// first: there is no sibling block left at this level.
    fn skip_block(&mut self) -> bool {
        let rest = &self.text[self.cursor..];
        let Some(start) = rest.find(&['(', ')'][..]) else {
            self.cursor = self.text.len();
            return false;
        };
        if rest.as_bytes()[start] == b')' {
            self.cursor += start;
            return false;
        }

        let mut depth = 0usize;
        for (i, b) in rest.bytes().enumerate().skip(start) {
            match b {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        trace!(from = self.cursor + start, to = self.cursor + i + 1, "skipped block");
                        self.cursor += i + 1;
                        return true;
                    }
                }
                _ => {}
            }
        }
        // Unbalanced to the end; the engine reports the open bracket.
        self.cursor = self.text.len();
        true
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
