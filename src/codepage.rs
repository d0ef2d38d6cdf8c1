use codepage_437::{BorrowFromCp437, CP437_CONTROL};
use encoding_rs::Encoding;

/// A character code table selectable with `ESC t n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codepage {
    pub number: u8,
    pub name: &'static str,
    // None = CP437, decoded with the codepage-437 crate
    encoding: Option<&'static Encoding>,
}

impl Codepage {
    pub fn select(number: u8) -> Self {
        // encoding_rs has no DOS codepages besides 866; the western tables
        // decode as Windows-1252 and cp852 as Windows-1250
        let (name, encoding) = match number {
            0 => ("cp437", None),
            1 => ("cp932", Some(encoding_rs::SHIFT_JIS)),
            2 => ("cp850", Some(encoding_rs::WINDOWS_1252)),
            3 => ("cp860", Some(encoding_rs::WINDOWS_1252)),
            4 => ("cp863", Some(encoding_rs::WINDOWS_1252)),
            5 => ("cp865", Some(encoding_rs::WINDOWS_1252)),
            16 => ("cp1252", Some(encoding_rs::WINDOWS_1252)),
            17 => ("cp866", Some(encoding_rs::IBM866)),
            18 => ("cp852", Some(encoding_rs::WINDOWS_1250)),
            19 => ("cp858", Some(encoding_rs::WINDOWS_1252)),
            // Unknown tables fall back to the power-on default
            _ => return Self::select(0),
        };
        Self {
            number,
            name,
            encoding,
        }
    }

    /// Decodes printer-native bytes. Never fails: a decode with errors is
    /// redone as Latin-1, one char per byte.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self.encoding {
            None => String::borrow_from_cp437(&bytes, &CP437_CONTROL),
            Some(encoding) => {
                let (decoded, _, had_errors) = encoding.decode(bytes);
                if had_errors {
                    tracing::debug!(codepage = self.name, "decode errors, falling back to latin-1");
                    latin1(bytes)
                } else {
                    decoded.into_owned()
                }
            }
        }
    }
}

impl Default for Codepage {
    fn default() -> Self {
        Self::select(0)
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_is_identical_everywhere() {
        for n in [0, 2, 16, 17, 18] {
            assert_eq!(Codepage::select(n).decode(b"Hello"), "Hello");
        }
    }

    #[test]
    fn cp437_box_drawing() {
        // 0xC4 is a horizontal line in CP437
        assert_eq!(Codepage::select(0).decode(&[0xC4, 0xC4]), "──");
    }

    #[test]
    fn unknown_table_is_cp437() {
        let cp = Codepage::select(42);
        assert_eq!(cp.number, 0);
        assert_eq!(cp.name, "cp437");
    }

    #[test]
    fn invalid_shift_jis_falls_back_to_latin1() {
        // Lone lead byte followed by an invalid trail byte
        let cp = Codepage::select(1);
        assert_eq!(cp.decode(&[0x81, 0x20]), "\u{81} ");
    }

    #[test]
    fn windows_1252_euro() {
        assert_eq!(Codepage::select(16).decode(&[0x80]), "€");
    }
}
