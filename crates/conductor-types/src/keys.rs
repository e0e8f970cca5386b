use serde::{Deserialize, Serialize};

/// The exhaustive set of symbolic keys the core recognizes on top of
/// raw text input.
///
/// `Ctrl('a'..='z')` covers `CTRL+A..CTRL+Z`; `Ctrl('\\')` covers the
/// separately-called-out `CTRL+\` escape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SymbolicKey {
    Enter,
    Tab,
    Escape,
    Backspace,
    Up,
    Down,
    Left,
    Right,
    Ctrl(char),
}

impl SymbolicKey {
    /// The literal bytes written to the PTY master for this key.
    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            SymbolicKey::Enter => b"\r".to_vec(),
            SymbolicKey::Tab => b"\t".to_vec(),
            SymbolicKey::Escape => b"\x1b".to_vec(),
            SymbolicKey::Backspace => b"\x7f".to_vec(),
            SymbolicKey::Up => b"\x1b[A".to_vec(),
            SymbolicKey::Down => b"\x1b[B".to_vec(),
            SymbolicKey::Right => b"\x1b[C".to_vec(),
            SymbolicKey::Left => b"\x1b[D".to_vec(),
            SymbolicKey::Ctrl('\\') => vec![0x1c],
            SymbolicKey::Ctrl(letter) => {
                let upper = letter.to_ascii_uppercase() as u8;
                vec![upper & 0x1f]
            }
        }
    }

    /// Parses the `CTRL+<letter>` / `CTRL+\` wire form used by clients
    /// that send keys as strings rather than structured values.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "ENTER" => Some(SymbolicKey::Enter),
            "TAB" => Some(SymbolicKey::Tab),
            "ESCAPE" => Some(SymbolicKey::Escape),
            "BACKSPACE" => Some(SymbolicKey::Backspace),
            "UP" => Some(SymbolicKey::Up),
            "DOWN" => Some(SymbolicKey::Down),
            "LEFT" => Some(SymbolicKey::Left),
            "RIGHT" => Some(SymbolicKey::Right),
            _ => token
                .strip_prefix("CTRL+")
                .and_then(|rest| rest.chars().next())
                .map(SymbolicKey::Ctrl),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctrl_c_is_etx() {
        assert_eq!(SymbolicKey::Ctrl('c').as_bytes(), vec![0x03]);
        assert_eq!(SymbolicKey::Ctrl('C').as_bytes(), vec![0x03]);
    }

    #[test]
    fn ctrl_backslash_is_file_separator() {
        assert_eq!(SymbolicKey::Ctrl('\\').as_bytes(), vec![0x1c]);
    }

    #[test]
    fn arrow_keys_are_csi_sequences() {
        assert_eq!(SymbolicKey::Up.as_bytes(), b"\x1b[A".to_vec());
        assert_eq!(SymbolicKey::Down.as_bytes(), b"\x1b[B".to_vec());
    }

    #[test]
    fn parse_round_trips_named_keys() {
        assert_eq!(SymbolicKey::parse("ENTER"), Some(SymbolicKey::Enter));
        assert_eq!(SymbolicKey::parse("CTRL+A"), Some(SymbolicKey::Ctrl('A')));
        assert_eq!(SymbolicKey::parse("CTRL+\\"), Some(SymbolicKey::Ctrl('\\')));
        assert_eq!(SymbolicKey::parse("NOT_A_KEY"), None);
    }
}
