// clcore Debug Support - Evaluation Stack Snapshots
//
// The interpreter keeps a light record of active calls. When an error is
// signalled the record is rendered into a `Backtrace`, which serializes to
// JSON for tools that want to show it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::printer;
use crate::types::Value;

/// One active call on the interpreter's stack.
#[derive(Clone)]
pub struct StackFrame {
    pub operator: Value,
    pub arguments: Vec<Value>,
}

/// A rendered frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub operator: String,
    pub arguments: Vec<String>,
}

/// Frames, innermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backtrace {
    pub frames: Vec<FrameSnapshot>,
}

impl Backtrace {
    /// Render up to `limit` frames, innermost first.
    pub fn capture(stack: &[StackFrame], limit: usize) -> Self {
        let frames = stack
            .iter()
            .rev()
            .take(limit)
            .map(|frame| FrameSnapshot {
                operator: printer::prin1_to_string(&frame.operator, None),
                arguments: frame
                    .arguments
                    .iter()
                    .map(|a| printer::prin1_to_string(a, None))
                    .collect(),
            })
            .collect();
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for Backtrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, frame) in self.frames.iter().enumerate() {
            write!(f, "{:>3}: ({}", i, frame.operator)?;
            for arg in &frame.arguments {
                write!(f, " {}", arg)?;
            }
            writeln!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_orders_innermost_first() {
        let stack = vec![
            StackFrame {
                operator: Value::string("outer"),
                arguments: vec![],
            },
            StackFrame {
                operator: Value::string("inner"),
                arguments: vec![Value::Fixnum(1)],
            },
        ];
        let bt = Backtrace::capture(&stack, 10);
        assert_eq!(bt.len(), 2);
        assert_eq!(bt.frames[0].operator, "\"inner\"");
        assert_eq!(bt.frames[0].arguments, vec!["1".to_string()]);
        assert_eq!(Backtrace::capture(&stack, 1).len(), 1);
    }

    #[test]
    fn test_json_shape() {
        let bt = Backtrace {
            frames: vec![FrameSnapshot {
                operator: "FOO".into(),
                arguments: vec!["1".into()],
            }],
        };
        let json = bt.to_json().unwrap();
        let back: Backtrace = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bt);
        assert!(bt.to_string().contains("(FOO 1)"));
    }
}
