//! Lesson quiz flow.
//!
//! A lesson's quiz walks through its questions in order: the child picks an
//! option, submits it to see the explanation, then advances. After the last
//! question the flow moves to `Completing` while the completion is recorded,
//! and finally to `Completed` with the score.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::completion_percent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizItem {
    pub question_id: i32,
    pub option_count: usize,
    pub correct_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizState {
    Loading,
    Presenting {
        index: usize,
        selected: Option<usize>,
    },
    ShowingExplanation {
        index: usize,
        correct: bool,
    },
    Completing,
    Completed {
        score_percent: i32,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuizError {
    #[error("quiz is not loaded")]
    NotLoaded,
    #[error("option {option} out of range for question {question_id}")]
    OptionOutOfRange { question_id: i32, option: usize },
    #[error("no option selected")]
    NothingSelected,
    #[error("invalid transition from {0}")]
    InvalidTransition(&'static str),
}

/// One answer as recorded during the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizAnswer {
    pub question_id: i32,
    pub selected_index: usize,
    pub correct: bool,
}

#[derive(Debug, Clone)]
pub struct QuizFlow {
    items: Vec<QuizItem>,
    state: QuizState,
    answers: Vec<QuizAnswer>,
}

impl Default for QuizFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl QuizFlow {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            state: QuizState::Loading,
            answers: Vec::new(),
        }
    }

    pub fn state(&self) -> &QuizState {
        &self.state
    }

    pub fn answers(&self) -> &[QuizAnswer] {
        &self.answers
    }

    /// A lesson without questions goes straight to `Completing`.
    pub fn load(&mut self, items: Vec<QuizItem>) -> Result<(), QuizError> {
        if self.state != QuizState::Loading {
            return Err(QuizError::InvalidTransition(self.state_name()));
        }
        self.state = if items.is_empty() {
            QuizState::Completing
        } else {
            QuizState::Presenting {
                index: 0,
                selected: None,
            }
        };
        self.items = items;
        Ok(())
    }

    pub fn select(&mut self, option: usize) -> Result<(), QuizError> {
        let QuizState::Presenting { index, .. } = self.state else {
            return Err(self.transition_error());
        };
        let item = &self.items[index];
        if option >= item.option_count {
            return Err(QuizError::OptionOutOfRange {
                question_id: item.question_id,
                option,
            });
        }
        self.state = QuizState::Presenting {
            index,
            selected: Some(option),
        };
        Ok(())
    }

    /// Returns whether the selected option was right.
    pub fn submit(&mut self) -> Result<bool, QuizError> {
        let QuizState::Presenting { index, selected } = self.state else {
            return Err(self.transition_error());
        };
        let selected = selected.ok_or(QuizError::NothingSelected)?;
        let item = &self.items[index];
        let correct = selected == item.correct_index;
        self.answers.push(QuizAnswer {
            question_id: item.question_id,
            selected_index: selected,
            correct,
        });
        self.state = QuizState::ShowingExplanation { index, correct };
        Ok(correct)
    }

    pub fn advance(&mut self) -> Result<(), QuizError> {
        let QuizState::ShowingExplanation { index, .. } = self.state else {
            return Err(self.transition_error());
        };
        self.state = if index + 1 < self.items.len() {
            QuizState::Presenting {
                index: index + 1,
                selected: None,
            }
        } else {
            QuizState::Completing
        };
        Ok(())
    }

    /// Score in percent of correctly answered questions.
    pub fn score_percent(&self) -> i32 {
        let correct = self.answers.iter().filter(|a| a.correct).count() as i64;
        if self.items.is_empty() {
            100
        } else {
            completion_percent(correct, self.items.len() as i64)
        }
    }

    pub fn finish(&mut self) -> Result<i32, QuizError> {
        if self.state != QuizState::Completing {
            return Err(self.transition_error());
        }
        let score_percent = self.score_percent();
        self.state = QuizState::Completed { score_percent };
        Ok(score_percent)
    }

    /// Drives the whole flow from a list of selections, one per question.
    pub fn run(items: Vec<QuizItem>, selections: &[usize]) -> Result<Self, QuizError> {
        let mut flow = Self::new();
        flow.load(items)?;
        let mut picks = selections.iter();
        while let QuizState::Presenting { .. } = flow.state {
            let pick = picks.next().ok_or(QuizError::NothingSelected)?;
            flow.select(*pick)?;
            flow.submit()?;
            flow.advance()?;
        }
        flow.finish()?;
        Ok(flow)
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            QuizState::Loading => "loading",
            QuizState::Presenting { .. } => "presenting",
            QuizState::ShowingExplanation { .. } => "showing_explanation",
            QuizState::Completing => "completing",
            QuizState::Completed { .. } => "completed",
        }
    }

    fn transition_error(&self) -> QuizError {
        if self.state == QuizState::Loading {
            QuizError::NotLoaded
        } else {
            QuizError::InvalidTransition(self.state_name())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<QuizItem> {
        vec![
            QuizItem {
                question_id: 1,
                option_count: 3,
                correct_index: 0,
            },
            QuizItem {
                question_id: 2,
                option_count: 2,
                correct_index: 1,
            },
        ]
    }

    #[test]
    fn walks_through_questions() {
        let mut flow = QuizFlow::new();
        assert_eq!(flow.select(0), Err(QuizError::NotLoaded));
        flow.load(items()).unwrap();
        assert_eq!(flow.submit(), Err(QuizError::NothingSelected));
        flow.select(0).unwrap();
        assert!(flow.submit().unwrap());
        assert_eq!(
            flow.state(),
            &QuizState::ShowingExplanation {
                index: 0,
                correct: true
            }
        );
        assert!(flow.select(1).is_err());
        flow.advance().unwrap();
        flow.select(0).unwrap();
        assert!(!flow.submit().unwrap());
        flow.advance().unwrap();
        assert_eq!(flow.state(), &QuizState::Completing);
        assert_eq!(flow.finish().unwrap(), 50);
        assert_eq!(flow.state(), &QuizState::Completed { score_percent: 50 });
    }

    #[test]
    fn rejects_out_of_range_options() {
        let mut flow = QuizFlow::new();
        flow.load(items()).unwrap();
        assert_eq!(
            flow.select(3),
            Err(QuizError::OptionOutOfRange {
                question_id: 1,
                option: 3
            })
        );
    }

    #[test]
    fn run_needs_an_answer_per_question() {
        assert_eq!(
            QuizFlow::run(items(), &[0]).unwrap_err(),
            QuizError::NothingSelected
        );
        let flow = QuizFlow::run(items(), &[0, 1]).unwrap();
        assert_eq!(flow.score_percent(), 100);
        assert_eq!(flow.answers().len(), 2);
    }

    #[test]
    fn empty_quiz_completes_immediately() {
        let flow = QuizFlow::run(Vec::new(), &[]).unwrap();
        assert_eq!(flow.state(), &QuizState::Completed { score_percent: 100 });
    }
}
