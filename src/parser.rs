use std::path::PathBuf;

use thiserror::Error;

use crate::ast::{PipelineSpec, StageSpec};

/// Operators recognised outside of quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `|`
    Pipe,
    /// `<`
    Input,
    /// `>`
    Output,
    /// `2>` or `>&`
    Error,
    /// `&`
    Background,
}

impl Operator {
    fn as_str(self) -> &'static str {
        match self {
            Operator::Pipe => "|",
            Operator::Input => "<",
            Operator::Output => ">",
            Operator::Error => "2>",
            Operator::Background => "&",
        }
    }
}

/// A lexical unit of a command line.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Word(String),
    Op(Operator),
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("syntax error near unexpected token `{0}'")]
    UnexpectedToken(&'static str),
    #[error("syntax error: expected filename after `{0}'")]
    MissingFilename(&'static str),
    #[error("syntax error: `{0}' is only allowed on the {1} command of a pipeline")]
    MisplacedRedirection(&'static str, &'static str),
    #[error("syntax error: duplicate `{0}' redirection")]
    DuplicateRedirection(&'static str),
    #[error("syntax error: `&' must end the line")]
    MisplacedBackground,
}

/// States for the tokenizer state machine.
enum State {
    /// Between tokens — whitespace is skipped
    Normal,
    /// Building an unquoted word — whitespace ends it
    InWord,
    /// Inside double quotes — whitespace is preserved
    InDoubleQuote,
    /// Inside single quotes — everything is literal
    InSingleQuote,
}

/// Split a line into words and operators.
///
/// Quotes and backslashes only affect grouping; nothing is expanded.
/// An unterminated quote runs to the end of the line.
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut state = State::Normal;
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        match (&state, ch) {
            (State::Normal | State::InWord, ' ' | '\t' | '\n') => {
                if matches!(state, State::InWord) {
                    tokens.push(Token::Word(std::mem::take(&mut word)));
                }
                state = State::Normal;
            }
            (State::Normal | State::InWord, '|' | '<' | '>' | '&') => {
                if matches!(state, State::InWord) {
                    tokens.push(Token::Word(std::mem::take(&mut word)));
                }
                let op = match ch {
                    '|' => Operator::Pipe,
                    '<' => Operator::Input,
                    '&' => Operator::Background,
                    _ if chars.peek() == Some(&'&') => {
                        chars.next();
                        Operator::Error
                    }
                    _ => Operator::Output,
                };
                tokens.push(Token::Op(op));
                state = State::Normal;
            }
            // `2>` is only an operator at the start of a word.
            (State::Normal, '2') if chars.peek() == Some(&'>') => {
                chars.next();
                tokens.push(Token::Op(Operator::Error));
            }
            (State::Normal | State::InWord, '"') => state = State::InDoubleQuote,
            (State::Normal | State::InWord, '\'') => state = State::InSingleQuote,
            (State::Normal | State::InWord, '\\') => {
                word.push(chars.next().unwrap_or('\\'));
                state = State::InWord;
            }
            (State::Normal | State::InWord, c) => {
                word.push(c);
                state = State::InWord;
            }

            (State::InDoubleQuote, '"') => state = State::InWord,
            (State::InDoubleQuote, '\\') => match chars.peek() {
                Some(&(next @ ('"' | '\\'))) => {
                    word.push(next);
                    chars.next();
                }
                _ => word.push('\\'),
            },
            (State::InDoubleQuote, c) => word.push(c),

            (State::InSingleQuote, '\'') => state = State::InWord,
            (State::InSingleQuote, c) => word.push(c),
        }
    }

    // Quoted text counts as a word even when empty (`echo ""`).
    if !matches!(state, State::Normal) {
        tokens.push(Token::Word(word));
    }

    tokens
}

/// Parse one input line into a pipeline.
///
/// Returns `Ok(None)` for a blank line.
pub fn parse_line(input: &str) -> Result<Option<PipelineSpec>, ParseError> {
    let tokens = tokenize(input);
    if tokens.is_empty() {
        return Ok(None);
    }

    let mut stages: Vec<StageSpec> = Vec::new();
    let mut words: Vec<String> = Vec::new();
    let mut input_path = None;
    let mut output_path = None;
    let mut error_path = None;
    let mut background = false;
    let mut iter = tokens.into_iter();

    while let Some(token) = iter.next() {
        if background {
            return Err(ParseError::MisplacedBackground);
        }
        match token {
            Token::Word(w) => words.push(w),
            Token::Op(Operator::Pipe) => {
                stages.push(finish_stage(&mut words, Operator::Pipe)?);
                // Output-side redirections must wait for the last stage.
                if let Some(op) = [(Operator::Output, &output_path), (Operator::Error, &error_path)]
                    .into_iter()
                    .find_map(|(op, path)| path.is_some().then_some(op))
                {
                    return Err(ParseError::MisplacedRedirection(op.as_str(), "last"));
                }
            }
            Token::Op(Operator::Background) => background = true,
            Token::Op(op) => {
                let path = match iter.next() {
                    Some(Token::Word(w)) => PathBuf::from(w),
                    _ => return Err(ParseError::MissingFilename(op.as_str())),
                };
                let slot = match op {
                    Operator::Input if !stages.is_empty() => {
                        return Err(ParseError::MisplacedRedirection(op.as_str(), "first"));
                    }
                    Operator::Input => &mut input_path,
                    Operator::Output => &mut output_path,
                    _ => &mut error_path,
                };
                if slot.replace(path).is_some() {
                    return Err(ParseError::DuplicateRedirection(op.as_str()));
                }
            }
        }
    }

    let last_op = if background { Operator::Background } else { Operator::Pipe };
    stages.push(finish_stage(&mut words, last_op)?);

    Ok(Some(PipelineSpec {
        stages,
        input_path,
        output_path,
        error_path,
        background,
    }))
}

fn finish_stage(words: &mut Vec<String>, next: Operator) -> Result<StageSpec, ParseError> {
    let mut words = std::mem::take(words).into_iter();
    match words.next() {
        Some(program) => Ok(StageSpec {
            program,
            args: words.collect(),
        }),
        None => Err(ParseError::UnexpectedToken(next.as_str())),
    }
}
