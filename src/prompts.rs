//! Instruction texts sent to the vision model.
//!
//! Every prompt lives here so the wording can change in one place and unit
//! tests can inspect it without a live model.
//!
//! A prompt is only half of the contract: the parser must split rows on the
//! same separator the model was asked to use. [`PromptSet`] therefore
//! carries the delimiter next to the two instruction texts, and the rest of
//! the crate reads both from the same value.

use serde::{Deserialize, Serialize};

/// System instruction asking for a comma-separated table.
pub const COMMA_SYSTEM_INSTRUCTION: &str = "Extract the text elements from the image as described by the user, and return the result formatted as a comma-separated table (using , as separator). Preserve new lines and structure the table to match the visible assumed table layout precisely. All other text that seems to not be a table must be joined and included at the end of table in their own rows, do not leave any visible text not extracted.";

/// User instruction paired with [`COMMA_SYSTEM_INSTRUCTION`].
pub const COMMA_USER_INSTRUCTION: &str = "Extract all text from the image and format it as a comma-separated table (using , as separator), preserving new lines and matching the assumed table structure exactly. Do this precisely and without deviation.";

/// System instruction asking for a pipe-separated table.
pub const PIPE_SYSTEM_INSTRUCTION: &str = "Extract the text elements from the image as described by the user, and return the result formatted as a pipe-separated table (using | as separator). Preserve new lines and structure the table to match the visible assumed table layout precisely. All other text that seems to not be a table must be joined and included at the end of table in their own rows, do not leave any visible text not extracted.";

/// User instruction paired with [`PIPE_SYSTEM_INSTRUCTION`].
pub const PIPE_USER_INSTRUCTION: &str = "Extract all text from the image and format it as a pipe-separated table (using | as separator), preserving new lines and matching the assumed table structure exactly. Do this precisely and without deviation.";

/// The two built-in prompt families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PromptVariant {
    /// Comma-separated cells. (default)
    #[default]
    Comma,
    /// Pipe-separated cells.
    Pipe,
}

impl PromptVariant {
    /// The cell delimiter this variant asks the model to emit.
    pub fn delimiter(self) -> char {
        match self {
            PromptVariant::Comma => ',',
            PromptVariant::Pipe => '|',
        }
    }
}

/// The instructions and cell delimiter for one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSet {
    pub system_instruction: String,
    pub user_instruction: String,
    pub delimiter: char,
}

impl PromptSet {
    /// Built-in prompts for `variant`.
    pub fn for_variant(variant: PromptVariant) -> Self {
        match variant {
            PromptVariant::Comma => Self::comma(),
            PromptVariant::Pipe => Self::pipe(),
        }
    }

    pub fn comma() -> Self {
        Self {
            system_instruction: COMMA_SYSTEM_INSTRUCTION.to_string(),
            user_instruction: COMMA_USER_INSTRUCTION.to_string(),
            delimiter: PromptVariant::Comma.delimiter(),
        }
    }

    pub fn pipe() -> Self {
        Self {
            system_instruction: PIPE_SYSTEM_INSTRUCTION.to_string(),
            user_instruction: PIPE_USER_INSTRUCTION.to_string(),
            delimiter: PromptVariant::Pipe.delimiter(),
        }
    }

    /// Custom instructions. The caller is responsible for asking the model
    /// for `delimiter`-separated output.
    pub fn custom(
        system_instruction: impl Into<String>,
        user_instruction: impl Into<String>,
        delimiter: char,
    ) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            user_instruction: user_instruction.into(),
            delimiter,
        }
    }
}

impl Default for PromptSet {
    fn default() -> Self {
        Self::comma()
    }
}
