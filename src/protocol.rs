use serde::Serialize;
use std::fmt;

pub const ESC: u8 = 0x1B;
pub const GS: u8 = 0x1D;
pub const DLE: u8 = 0x10;
pub const EOT: u8 = 0x04;
pub const LF: u8 = 0x0A;
pub const CR: u8 = 0x0D;

/// Bytes that end a run of printable text.
pub(crate) fn is_text_terminator(byte: u8) -> bool {
    matches!(byte, ESC | GS | DLE | LF | CR)
}

/// The label a command is known by in logs, history and fault triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Text,
    Initialize,
    PrintMode,
    Underline,
    Alignment,
    Feed,
    Codepage,
    Cut,
    Barcode,
    Image,
    Qr,
    HriPosition,
    HriFont,
    BarcodeWidth,
    BarcodeHeight,
    CarriageReturn,
    StatusRequest,
    Unrecognized,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::Text => "text",
            CommandType::Initialize => "initialize",
            CommandType::PrintMode => "print_mode",
            CommandType::Underline => "underline",
            CommandType::Alignment => "alignment",
            CommandType::Feed => "feed",
            CommandType::Codepage => "codepage",
            CommandType::Cut => "cut",
            CommandType::Barcode => "barcode",
            CommandType::Image => "image",
            CommandType::Qr => "qr",
            CommandType::HriPosition => "hri_position",
            CommandType::HriFont => "hri_font",
            CommandType::BarcodeWidth => "barcode_width",
            CommandType::BarcodeHeight => "barcode_height",
            CommandType::CarriageReturn => "carriage_return",
            CommandType::StatusRequest => "status_request",
            CommandType::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrintMode {
    pub bold: bool,
    pub underline: bool,
    pub double_width: bool,
    pub double_height: bool,
}

impl PrintMode {
    // ESC ! n bit layout
    pub fn from_bits(n: u8) -> Self {
        Self {
            bold: (n & 0x08) != 0,
            double_height: (n & 0x10) != 0,
            double_width: (n & 0x20) != 0,
            underline: (n & 0x80) != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnderlineMode {
    None,
    Single,
    Double,
}

impl From<u8> for UnderlineMode {
    fn from(n: u8) -> Self {
        match n {
            1 => UnderlineMode::Single,
            2 => UnderlineMode::Double,
            _ => UnderlineMode::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    Left,
    Center,
    Right,
}

impl From<u8> for Alignment {
    fn from(n: u8) -> Self {
        match n {
            1 => Alignment::Center,
            2 => Alignment::Right,
            _ => Alignment::Left,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CutMode {
    Partial,
    Full,
}

impl CutMode {
    // GS V m: 65 ('A') partial, 66 ('B') full; the legacy 0/1 and '0'/'1' forms too
    pub fn from_gs_v(m: u8) -> Self {
        match m {
            0x41 | 1 | b'1' => CutMode::Partial,
            _ => CutMode::Full,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HriPosition {
    NotPrinted,
    Above,
    Below,
    Both,
}

impl From<u8> for HriPosition {
    fn from(n: u8) -> Self {
        match n {
            0 => HriPosition::NotPrinted,
            1 => HriPosition::Above,
            3 => HriPosition::Both,
            _ => HriPosition::Below,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HriFont {
    A,
    B,
}

impl From<u8> for HriFont {
    fn from(n: u8) -> Self {
        match n {
            1 => HriFont::B,
            _ => HriFont::A,
        }
    }
}

/// GS ( k sub-functions for QR symbols (cn = 49).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "function", rename_all = "snake_case")]
pub enum QrFunction {
    SelectModel { model: u8 },
    ModuleSize { size: u8 },
    ErrorCorrection { level: u8 },
    Store {
        #[serde(serialize_with = "crate::command::hex_bytes")]
        data: Vec<u8>,
    },
    Print,
    Other { cn: u8, code: u8 },
}

impl QrFunction {
    /// Decodes the parameter block that follows `GS ( k pL pH`.
    pub fn from_params(params: &[u8]) -> Self {
        let (cn, code) = match params {
            [cn, code, ..] => (*cn, *code),
            [cn] => (*cn, 0),
            [] => (0, 0),
        };
        if cn != 49 {
            return QrFunction::Other { cn, code };
        }
        let arg = params.get(2).copied().unwrap_or(0);
        match code {
            65 => QrFunction::SelectModel { model: arg },
            67 => QrFunction::ModuleSize { size: arg },
            69 => QrFunction::ErrorCorrection { level: arg },
            // cn fn m d1...dk
            80 => QrFunction::Store {
                data: params.get(3..).unwrap_or_default().to_vec(),
            },
            81 => QrFunction::Print,
            _ => QrFunction::Other { cn, code },
        }
    }
}

/// A decoded protocol unit. Serializes to the `parameters` map of a
/// command, tagged with its type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandKind {
    Text {
        text: String,
    },
    Initialize,
    PrintMode(PrintMode),
    Underline {
        mode: UnderlineMode,
    },
    Alignment {
        alignment: Alignment,
    },
    /// LF
    LineFeed,
    /// ESC d n
    FeedLines {
        lines: u8,
    },
    Codepage {
        codepage: u8,
        encoding: &'static str,
    },
    Cut {
        mode: CutMode,
    },
    Barcode {
        barcode_type: u8,
        data: String,
    },
    Image {
        function: u8,
        data_length: usize,
        #[serde(serialize_with = "crate::command::hex_bytes")]
        image_data: Vec<u8>,
    },
    Qr(QrFunction),
    HriPosition {
        position: HriPosition,
    },
    HriFont {
        font: HriFont,
    },
    BarcodeWidth {
        width: u8,
    },
    BarcodeHeight {
        height: u8,
    },
    CarriageReturn,
    StatusRequest {
        n: u8,
    },
    Unrecognized {
        prefix: u8,
        selector: u8,
    },
}

impl CommandKind {
    pub fn command_type(&self) -> CommandType {
        match self {
            CommandKind::Text { .. } => CommandType::Text,
            CommandKind::Initialize => CommandType::Initialize,
            CommandKind::PrintMode(_) => CommandType::PrintMode,
            CommandKind::Underline { .. } => CommandType::Underline,
            CommandKind::Alignment { .. } => CommandType::Alignment,
            CommandKind::LineFeed | CommandKind::FeedLines { .. } => CommandType::Feed,
            CommandKind::Codepage { .. } => CommandType::Codepage,
            CommandKind::Cut { .. } => CommandType::Cut,
            CommandKind::Barcode { .. } => CommandType::Barcode,
            CommandKind::Image { .. } => CommandType::Image,
            CommandKind::Qr(_) => CommandType::Qr,
            CommandKind::HriPosition { .. } => CommandType::HriPosition,
            CommandKind::HriFont { .. } => CommandType::HriFont,
            CommandKind::BarcodeWidth { .. } => CommandType::BarcodeWidth,
            CommandKind::BarcodeHeight { .. } => CommandType::BarcodeHeight,
            CommandKind::CarriageReturn => CommandType::CarriageReturn,
            CommandKind::StatusRequest { .. } => CommandType::StatusRequest,
            CommandKind::Unrecognized { .. } => CommandType::Unrecognized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_mode_bits() {
        let mode = PrintMode::from_bits(0x08);
        assert!(mode.bold);
        assert!(!mode.underline && !mode.double_width && !mode.double_height);

        let mode = PrintMode::from_bits(0x30 | 0x80);
        assert!(!mode.bold);
        assert!(mode.double_width && mode.double_height && mode.underline);
    }

    #[test]
    fn cut_modes() {
        assert_eq!(CutMode::from_gs_v(0x41), CutMode::Partial);
        assert_eq!(CutMode::from_gs_v(0x42), CutMode::Full);
        assert_eq!(CutMode::from_gs_v(0x00), CutMode::Full);
        assert_eq!(CutMode::from_gs_v(0x99), CutMode::Full);
    }

    #[test]
    fn qr_store_and_print() {
        let store = QrFunction::from_params(b"\x31\x50\x30https://test.com");
        assert_eq!(
            store,
            QrFunction::Store {
                data: b"https://test.com".to_vec()
            }
        );
        assert_eq!(QrFunction::from_params(b"\x31\x51\x30"), QrFunction::Print);
        assert_eq!(
            QrFunction::from_params(b"\x32\x41"),
            QrFunction::Other { cn: 0x32, code: 0x41 }
        );
    }

    #[test]
    fn parameters_serialize_with_type_tag() {
        let value = serde_json::to_value(CommandKind::FeedLines { lines: 3 }).unwrap();
        assert_eq!(value, serde_json::json!({"type": "feed_lines", "lines": 3}));

        let value = serde_json::to_value(CommandKind::PrintMode(PrintMode::from_bits(0x08))).unwrap();
        assert_eq!(value["bold"], serde_json::json!(true));
        assert_eq!(value["type"], serde_json::json!("print_mode"));
    }
}
