use tracing::debug;

use crate::codepage::Codepage;
use crate::command::Command;
use crate::protocol::*;

/// Outcome of one decode attempt at the front of the buffer.
#[derive(Debug)]
enum Step {
    Emit(CommandKind, usize),
    // Unknown selector: prefix and selector bytes are dropped
    Skip { prefix: u8, selector: u8 },
    Incomplete,
}

/// Streaming ESC/POS decoder. Bytes may arrive split at any boundary;
/// partial commands stay buffered until the rest shows up.
#[derive(Debug)]
pub struct CommandParser {
    buffer: Vec<u8>,
    codepage: Codepage,
    initial_codepage: Codepage,
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new(Codepage::default())
    }
}

impl CommandParser {
    pub fn new(initial_codepage: Codepage) -> Self {
        Self {
            buffer: Vec::new(),
            codepage: initial_codepage,
            initial_codepage,
        }
    }

    /// Appends `data` and decodes every complete command now available.
    /// An empty slice just drains what is already buffered.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Command> {
        self.buffer.extend_from_slice(data);

        let mut commands = Vec::new();
        let mut i = 0;
        while i < self.buffer.len() {
            match self.decode(&self.buffer[i..]) {
                Step::Emit(kind, len) => {
                    match kind {
                        CommandKind::Codepage { codepage, .. } => {
                            self.codepage = Codepage::select(codepage)
                        }
                        // ESC @ restores the power-on code table
                        CommandKind::Initialize => self.codepage = self.initial_codepage,
                        _ => {}
                    }
                    let raw_data = self.buffer[i..i + len].to_vec();
                    debug!(command = %kind.command_type(), raw = %hex::encode(&raw_data), "decoded");
                    commands.push(Command::new(kind, raw_data));
                    i += len;
                }
                Step::Skip { prefix, selector } => {
                    debug!("skipping unknown command {:02X} {:02X}", prefix, selector);
                    i += 2;
                }
                Step::Incomplete => break,
            }
        }

        self.buffer.drain(0..i);
        commands
    }

    /// Drops any partially received command and restores the initial codepage.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.codepage = self.initial_codepage;
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn codepage(&self) -> Codepage {
        self.codepage
    }

    fn decode(&self, data: &[u8]) -> Step {
        match data[0] {
            ESC => self.decode_esc(data),
            GS => self.decode_gs(data),
            DLE => decode_dle(data),
            LF => Step::Emit(CommandKind::LineFeed, 1),
            CR => Step::Emit(CommandKind::CarriageReturn, 1),
            _ => self.decode_text(data),
        }
    }

    fn decode_esc(&self, data: &[u8]) -> Step {
        let Some(&cmd) = data.get(1) else {
            return Step::Incomplete;
        };
        match cmd {
            // ESC @ - initialize
            b'@' => Step::Emit(CommandKind::Initialize, 2),
            // ESC ! n - select print mode
            b'!' => with_arg(data, |n| CommandKind::PrintMode(PrintMode::from_bits(n))),
            // ESC - n - underline
            b'-' => with_arg(data, |n| CommandKind::Underline { mode: n.into() }),
            // ESC a n - justification
            b'a' => with_arg(data, |n| CommandKind::Alignment { alignment: n.into() }),
            // ESC d n - print and feed n lines
            b'd' => with_arg(data, |lines| CommandKind::FeedLines { lines }),
            // ESC i / ESC m - partial / full cut
            b'i' => Step::Emit(CommandKind::Cut { mode: CutMode::Partial }, 2),
            b'm' => Step::Emit(CommandKind::Cut { mode: CutMode::Full }, 2),
            // ESC t n - select character code table
            b't' => with_arg(data, |n| {
                let selected = Codepage::select(n);
                CommandKind::Codepage {
                    codepage: n,
                    encoding: selected.name,
                }
            }),
            selector => Step::Skip {
                prefix: ESC,
                selector,
            },
        }
    }

    fn decode_gs(&self, data: &[u8]) -> Step {
        let Some(&cmd) = data.get(1) else {
            return Step::Incomplete;
        };
        match cmd {
            // GS V m - cut paper
            b'V' => with_arg(data, |m| CommandKind::Cut {
                mode: CutMode::from_gs_v(m),
            }),
            // GS k m n d1...dn - barcode, length-prefixed
            b'k' => {
                if data.len() < 4 {
                    return Step::Incomplete;
                }
                let barcode_type = data[2];
                let len = 4 + data[3] as usize;
                if data.len() < len {
                    return Step::Incomplete;
                }
                Step::Emit(
                    CommandKind::Barcode {
                        barcode_type,
                        data: self.codepage.decode(&data[4..len]),
                    },
                    len,
                )
            }
            // GS ( fn pL pH d1...dk - extended command with 16-bit length
            b'(' => {
                if data.len() < 5 {
                    return Step::Incomplete;
                }
                let function = data[2];
                let data_length = data[3] as usize + ((data[4] as usize) << 8);
                let len = 5 + data_length;
                if data.len() < len {
                    return Step::Incomplete;
                }
                let params = &data[5..len];
                let kind = if function == b'k' {
                    CommandKind::Qr(QrFunction::from_params(params))
                } else {
                    CommandKind::Image {
                        function,
                        data_length,
                        image_data: params.to_vec(),
                    }
                };
                Step::Emit(kind, len)
            }
            // GS H n - HRI position
            b'H' => with_arg(data, |n| CommandKind::HriPosition { position: n.into() }),
            // GS f n - HRI font
            b'f' => with_arg(data, |n| CommandKind::HriFont { font: n.into() }),
            // GS w n - barcode module width, 2..=6
            b'w' => with_arg(data, |n| CommandKind::BarcodeWidth { width: n.clamp(2, 6) }),
            // GS h n - barcode height in dots, 1..=255
            b'h' => with_arg(data, |n| CommandKind::BarcodeHeight { height: n.max(1) }),
            selector => Step::Skip {
                prefix: GS,
                selector,
            },
        }
    }

    fn decode_text(&self, data: &[u8]) -> Step {
        let end = data
            .iter()
            .position(|&b| is_text_terminator(b))
            .unwrap_or(data.len());
        Step::Emit(
            CommandKind::Text {
                text: self.codepage.decode(&data[..end]),
            },
            end,
        )
    }
}

// DLE EOT n - real-time status transmission
fn decode_dle(data: &[u8]) -> Step {
    let Some(&cmd) = data.get(1) else {
        return Step::Incomplete;
    };
    match cmd {
        EOT => with_arg(data, |n| CommandKind::StatusRequest { n }),
        selector => Step::Skip {
            prefix: DLE,
            selector,
        },
    }
}

/// Three-byte commands: prefix, selector, one parameter byte.
fn with_arg(data: &[u8], build: impl FnOnce(u8) -> CommandKind) -> Step {
    match data.get(2) {
        Some(&n) => Step::Emit(build(n), 3),
        None => Step::Incomplete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(commands: &[Command]) -> Vec<CommandKind> {
        commands.iter().map(|c| c.kind.clone()).collect()
    }

    #[test]
    fn test_esc_init_command() {
        let mut parser = CommandParser::default();
        let commands = parser.feed(b"\x1B\x40");
        assert_eq!(kinds(&commands), vec![CommandKind::Initialize]);
        assert_eq!(commands[0].raw_data, b"\x1B\x40");
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_alignment() {
        let mut parser = CommandParser::default();
        let commands = parser.feed(b"\x1B\x61\x00\x1B\x61\x01\x1B\x61\x02\x1B\x61\x09");
        assert_eq!(
            kinds(&commands),
            vec![
                CommandKind::Alignment { alignment: Alignment::Left },
                CommandKind::Alignment { alignment: Alignment::Center },
                CommandKind::Alignment { alignment: Alignment::Right },
                CommandKind::Alignment { alignment: Alignment::Left },
            ]
        );
    }

    #[test]
    fn test_double_width_height() {
        let mut parser = CommandParser::default();
        let commands = parser.feed(b"\x1B\x21\x30");
        assert_eq!(
            kinds(&commands),
            vec![CommandKind::PrintMode(PrintMode {
                bold: false,
                underline: false,
                double_width: true,
                double_height: true,
            })]
        );
    }

    #[test]
    fn test_underline() {
        let mut parser = CommandParser::default();
        let commands = parser.feed(b"\x1B\x2D\x01\x1B\x2D\x00\x1B\x2D\x02");
        assert_eq!(
            kinds(&commands),
            vec![
                CommandKind::Underline { mode: UnderlineMode::Single },
                CommandKind::Underline { mode: UnderlineMode::None },
                CommandKind::Underline { mode: UnderlineMode::Double },
            ]
        );
    }

    #[test]
    fn test_line_feed_and_carriage_return() {
        let mut parser = CommandParser::default();
        let commands = parser.feed(b"\x0A\x0D\x1B\x64\x03");
        assert_eq!(
            kinds(&commands),
            vec![
                CommandKind::LineFeed,
                CommandKind::CarriageReturn,
                CommandKind::FeedLines { lines: 3 },
            ]
        );
        assert_eq!(commands[0].command_type, CommandType::Feed);
        assert_eq!(commands[2].command_type, CommandType::Feed);
    }

    #[test]
    fn test_mixed_content() {
        let mut parser = CommandParser::default();
        let commands = parser.feed(b"Hello \x1B\x21\x08World\x1B\x21\x00!");
        let types: Vec<_> = commands.iter().map(|c| c.command_type).collect();
        assert_eq!(
            types,
            vec![
                CommandType::Text,
                CommandType::PrintMode,
                CommandType::Text,
                CommandType::PrintMode,
                CommandType::Text,
            ]
        );
        assert_eq!(commands[0].raw_data, b"Hello ");
        assert_eq!(commands[2].raw_data, b"World");
        assert_eq!(commands[4].raw_data, b"!");
    }

    #[test]
    fn test_partial_command() {
        let mut parser = CommandParser::default();
        assert!(parser.feed(b"\x1B").is_empty());
        assert_eq!(parser.pending(), 1);
        let commands = parser.feed(b"\x40");
        assert_eq!(kinds(&commands), vec![CommandKind::Initialize]);
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_invalid_command() {
        let mut parser = CommandParser::default();
        let commands = parser.feed(b"\x1B\xFF\x1D\x99A");
        // Both unknown selectors are consumed with their prefix, the text survives
        assert_eq!(kinds(&commands), vec![CommandKind::Text { text: "A".into() }]);
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn every_split_point_waits_for_the_full_command() {
        let mut image = b"\x1D\x28\x4C".to_vec();
        image.extend_from_slice(&300u16.to_le_bytes());
        image.extend(std::iter::repeat(0xAA).take(300));

        let samples: Vec<Vec<u8>> = vec![
            b"\x1B\x40".to_vec(),
            b"\x1B\x21\x08".to_vec(),
            b"\x1B\x2D\x01".to_vec(),
            b"\x1B\x61\x01".to_vec(),
            b"\x1B\x64\x02".to_vec(),
            b"\x1B\x69".to_vec(),
            b"\x1B\x6D".to_vec(),
            b"\x1B\x74\x10".to_vec(),
            b"\x1D\x56\x42".to_vec(),
            b"\x1D\x6B\x49\x05ABCDE".to_vec(),
            b"\x1D\x48\x02".to_vec(),
            b"\x1D\x66\x01".to_vec(),
            b"\x1D\x77\x03".to_vec(),
            b"\x1D\x68\x50".to_vec(),
            b"\x10\x04\x01".to_vec(),
            b"\x1D\x28\x6B\x03\x00\x31\x51\x30".to_vec(),
            image,
        ];

        for bytes in samples {
            for split in 1..bytes.len() {
                let mut parser = CommandParser::default();
                assert!(
                    parser.feed(&bytes[..split]).is_empty(),
                    "emitted early for {:02X?} split at {}",
                    &bytes[..bytes.len().min(8)],
                    split
                );
                let commands = parser.feed(&bytes[split..]);
                assert_eq!(commands.len(), 1);
                assert_eq!(commands[0].raw_data, bytes);
                assert_eq!(parser.pending(), 0);
            }
        }
    }

    #[test]
    fn image_uses_little_endian_length() {
        let mut parser = CommandParser::default();
        let mut bytes = b"\x1D\x28\x4C\x02\x01".to_vec();
        bytes.extend(std::iter::repeat(0x55).take(258));
        bytes.extend_from_slice(b"\x1D\x56\x41");

        let commands = parser.feed(&bytes);
        assert_eq!(commands.len(), 2);
        match &commands[0].kind {
            CommandKind::Image {
                function,
                data_length,
                image_data,
            } => {
                assert_eq!(*function, b'L');
                assert_eq!(*data_length, 258);
                assert_eq!(image_data.len(), 258);
            }
            other => panic!("expected image, got {:?}", other),
        }
        assert_eq!(commands[0].raw_data.len(), 263);
        assert_eq!(commands[1].command_type, CommandType::Cut);
    }

    #[test]
    fn barcode_payload_is_length_prefixed() {
        let mut parser = CommandParser::default();
        let commands = parser.feed(b"\x1D\x6B\x49\x0412345");
        assert_eq!(
            kinds(&commands),
            vec![
                CommandKind::Barcode {
                    barcode_type: 0x49,
                    data: "1234".into()
                },
                CommandKind::Text { text: "5".into() },
            ]
        );
    }

    #[test]
    fn barcode_settings_are_clamped() {
        let mut parser = CommandParser::default();
        let commands = parser.feed(b"\x1D\x77\x09\x1D\x77\x00\x1D\x68\x00\x1D\x48\x07\x1D\x66\x01");
        assert_eq!(
            kinds(&commands),
            vec![
                CommandKind::BarcodeWidth { width: 6 },
                CommandKind::BarcodeWidth { width: 2 },
                CommandKind::BarcodeHeight { height: 1 },
                CommandKind::HriPosition { position: HriPosition::Below },
                CommandKind::HriFont { font: HriFont::B },
            ]
        );
    }

    #[test]
    fn codepage_switch_affects_following_text() {
        let mut parser = CommandParser::default();
        // 0x80 is Ç in CP437 and € in Windows-1252
        let commands = parser.feed(b"\x80\x1B\x74\x10\x80");
        assert_eq!(
            kinds(&commands),
            vec![
                CommandKind::Text { text: "Ç".into() },
                CommandKind::Codepage {
                    codepage: 16,
                    encoding: "cp1252"
                },
                CommandKind::Text { text: "€".into() },
            ]
        );
        assert_eq!(parser.codepage().number, 16);

        parser.clear();
        assert_eq!(parser.codepage().number, 0);
    }

    #[test]
    fn empty_feed_drains_nothing_new() {
        let mut parser = CommandParser::default();
        assert!(parser.feed(b"").is_empty());
        parser.feed(b"\x1D\x56");
        assert!(parser.feed(b"").is_empty());
        assert_eq!(parser.pending(), 2);
    }

    #[test]
    fn example_receipt() {
        let mut parser = CommandParser::default();
        let commands = parser.feed(b"\x1B\x40\x1B\x21\x08Hi\n\x1D\x56\x41");
        let types: Vec<_> = commands.iter().map(|c| c.command_type).collect();
        assert_eq!(
            types,
            vec![
                CommandType::Initialize,
                CommandType::PrintMode,
                CommandType::Text,
                CommandType::Feed,
                CommandType::Cut,
            ]
        );
        assert_eq!(commands[2].raw_data, b"Hi");
        assert_eq!(commands[4].kind, CommandKind::Cut { mode: CutMode::Partial });
    }
}
