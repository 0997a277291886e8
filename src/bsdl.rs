//! BSDL (IEEE 1149.1 Boundary Scan Description Language) interpreter.
//!
//! `parse` turns the text of a BSDL file into a `BsdlDescription`: the device's IDCODE pattern,
//! its instruction set, its boundary-scan register cells and the pins those cells observe and
//! drive.  Parsing is a pure function of the input text.
//!
//! ```
//! let text = r#"
//! entity TINY is
//!   port (TCK, TMS, TDI : in bit; TDO : out bit; LED : out bit; BTN : in bit);
//!   attribute INSTRUCTION_LENGTH of TINY : entity is 2;
//!   attribute INSTRUCTION_OPCODE of TINY : entity is
//!     "BYPASS (11), EXTEST (00), SAMPLE (01)";
//!   attribute IDCODE_REGISTER of TINY : entity is
//!     "0001" & "0000000000000001" & "00000000111" & "1";
//!   attribute BOUNDARY_LENGTH of TINY : entity is 3;
//!   attribute BOUNDARY_REGISTER of TINY : entity is
//!     "0 (BC_1, BTN, INPUT, X), 1 (BC_1, *, CONTROL, 0), 2 (BC_1, LED, OUTPUT3, X, 1, 0, Z)";
//! end TINY;
//! "#;
//! let desc = jtag_bscan::bsdl::parse(text).unwrap();
//! assert_eq!(desc.entity(), "TINY");
//! assert!(jtag_bscan::bsdl::extract_devid(&desc).unwrap().matches(0x1000_100f));
//! assert_eq!(desc.pin("LED").unwrap().output_cell, Some(2));
//! ```
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

mod boundary;
mod idcode;
mod lexer;
mod parser;

pub use boundary::{BoundaryCell, CellFunction, ControlRef, DisableResult, Instruction};
pub use idcode::IdCodePattern;

use boundary::normalize_port;
use parser::{Entity, Value};

/// Port mode keyword of a `port` clause
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortMode {
    In,
    Out,
    InOut,
    Buffer,
    Linkage,
}

impl PortMode {
    pub(crate) fn from_keyword(s: &str) -> Option<Self> {
        Some(match s.to_ascii_lowercase().as_str() {
            "in" => PortMode::In,
            "out" => PortMode::Out,
            "inout" => PortMode::InOut,
            "buffer" => PortMode::Buffer,
            "linkage" => PortMode::Linkage,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinDirection {
    Input,
    Output,
    Bidirectional,
    /// Only served by control cells
    Control,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PinDef {
    /// Name as declared; bit-vector elements are `NAME(i)`
    pub name: String,
    pub direction: PinDirection,
    pub input_cell: Option<usize>,
    pub output_cell: Option<usize>,
    /// Control cell gating `output_cell` and the value that disables the driver
    pub control: Option<ControlRef>,
    /// Control cells naming this port directly
    pub control_cells: Vec<usize>,
    /// Package pins from the physical pin map
    pub package_pins: Vec<String>,
}

impl PinDef {
    pub fn can_drive(&self) -> bool {
        self.output_cell.is_some()
    }

    pub fn can_tristate(&self) -> bool {
        self.output_cell.is_some() && self.control.is_some()
    }

    /// Whether the output driver is enabled according to the register contents `reg`
    pub fn output_enabled(&self, reg: &[bool]) -> bool {
        self.control
            .map_or(true, |c| reg.get(c.cell).copied() != Some(c.disable_value))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BsdlDescription {
    entity: String,
    package: Option<String>,
    idcode: Option<IdCodePattern>,
    instruction_length: usize,
    instructions: Vec<Instruction>,
    instruction_capture: Option<String>,
    boundary_length: usize,
    cells: Vec<BoundaryCell>,
    pins: Vec<PinDef>,
    pin_lookup: HashMap<String, usize>,
}

/// Instruction names that select the boundary register without touching the pins
const SAMPLE_NAMES: [&str; 3] = ["SAMPLE", "SAMPLE/PRELOAD", "PRELOAD"];

/// Largest boundary register accepted from a file
pub const MAX_BOUNDARY_LENGTH: usize = 1 << 16;

impl BsdlDescription {
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Package selected by the `PHYSICAL_PIN_MAP` generic
    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    pub fn idcode(&self) -> Option<IdCodePattern> {
        self.idcode
    }

    pub fn instruction_length(&self) -> usize {
        self.instruction_length
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn instruction_capture(&self) -> Option<&str> {
        self.instruction_capture.as_deref()
    }

    pub fn boundary_length(&self) -> usize {
        self.boundary_length
    }

    /// Boundary cells indexed by cell number (cell 0 is nearest TDO)
    pub fn cells(&self) -> &[BoundaryCell] {
        &self.cells
    }

    pub fn pins(&self) -> &[PinDef] {
        &self.pins
    }

    /// Case-sensitive lookup of a pin by its declared name
    pub fn pin_index(&self, name: &str) -> Option<usize> {
        self.pin_lookup.get(name).copied()
    }

    pub fn pin(&self, name: &str) -> Option<&PinDef> {
        self.pin_index(name).map(|i| &self.pins[i])
    }

    /// First opcode of the named instruction as register bits, least significant bit first
    pub fn opcode(&self, name: &str) -> Option<Vec<bool>> {
        let inst = self
            .instructions
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))?;
        inst.opcodes.first().map(|code| {
            code.chars().rev().map(|c| c == '1').collect()
        })
    }

    /// Opcode used for passive sampling
    pub fn sample_opcode(&self) -> Option<Vec<bool>> {
        SAMPLE_NAMES.iter().find_map(|n| self.opcode(n))
    }

    /// Name of the instruction `bits` (LSB first) decodes to
    pub fn decode_instruction(&self, bits: &[bool]) -> Option<&str> {
        self.instructions
            .iter()
            .find(|inst| {
                inst.opcodes.iter().any(|code| {
                    code.len() == bits.len()
                        && code
                            .chars()
                            .rev()
                            .zip(bits)
                            .all(|(c, b)| matches!(c, 'x' | 'X') || (c == '1') == *b)
                })
            })
            .map(|inst| inst.name.as_str())
    }

    /// Register contents with every cell at its safe value and every output driver disabled.
    /// Don't-care safe values become 0.
    pub fn safe_register(&self) -> Vec<bool> {
        let mut reg: Vec<bool> = self.cells.iter().map(|c| c.safe.unwrap_or(false)).collect();
        for pin in &self.pins {
            if let Some(ctrl) = pin.control {
                reg[ctrl.cell] = ctrl.disable_value;
            }
        }
        reg
    }
}

fn relocate(err: Error, line: usize) -> Error {
    match err {
        Error::MalformedBsdl { message, .. } => Error::MalformedBsdl { line, message },
        other => other,
    }
}

struct Attributes<'a> {
    entity: &'a Entity,
}

impl<'a> Attributes<'a> {
    fn get(&self, name: &str) -> Option<(&'a Value, usize)> {
        self.entity
            .attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name) && a.target.eq_ignore_ascii_case(&self.entity.name))
            .map(|a| (&a.value, a.line))
    }

    fn required(&self, name: &str) -> Result<(&'a Value, usize)> {
        self.get(name).ok_or_else(|| {
            Error::bsdl(self.entity.line, format!("missing mandatory attribute {}", name))
        })
    }

    fn int(&self, name: &str) -> Result<usize> {
        match self.required(name)? {
            (Value::Int(n), _) => Ok(usize::try_from(*n).unwrap_or(usize::MAX)),
            (_, line) => Err(Error::bsdl(line, format!("{} must be a number", name))),
        }
    }

    fn text(&self, name: &str) -> Result<Option<(&'a str, usize)>> {
        match self.get(name) {
            None => Ok(None),
            Some((Value::Text(s), line)) => Ok(Some((s.as_str(), line))),
            Some((_, line)) => Err(Error::bsdl(line, format!("{} must be a string", name))),
        }
    }

    fn required_text(&self, name: &str) -> Result<(&'a str, usize)> {
        self.required(name)?;
        self.text(name)?
            .ok_or_else(|| Error::bsdl(self.entity.line, format!("missing mandatory attribute {}", name)))
    }
}

/// Physical pin map: package selected by the generic, then the constant of that name
fn pin_map(entity: &Entity) -> Result<(Option<String>, Vec<(String, Vec<String>)>)> {
    let package = entity
        .generics
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("PHYSICAL_PIN_MAP"))
        .and_then(|(_, default)| match default {
            Some(Value::Text(s)) => Some(s.clone()),
            _ => None,
        });
    let Some(package) = package else {
        return Ok((None, Vec::new()));
    };
    let constant = entity
        .constants
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(&package));
    let map = match constant {
        Some(c) => match &c.value {
            Value::Text(s) => boundary::parse_pin_map(s, c.line)?,
            _ => return Err(Error::bsdl(c.line, format!("pin map {} must be a string", c.name))),
        },
        None => Vec::new(),
    };
    Ok((Some(package), map))
}

fn expand_ports(entity: &Entity) -> Result<Vec<(String, PortMode)>> {
    if !entity.has_port_clause {
        return Err(Error::bsdl(entity.line, "missing mandatory port clause"));
    }
    let mut pins = Vec::new();
    for port in &entity.ports {
        match port.range {
            None => pins.push((port.name.clone(), port.mode)),
            Some((first, last)) => {
                let indices: Vec<u64> = if first <= last {
                    (first..=last).collect()
                } else {
                    (last..=first).rev().collect()
                };
                for i in indices {
                    pins.push((format!("{}({})", port.name, i), port.mode));
                }
            }
        }
    }
    Ok(pins)
}

/// Parse the text of a BSDL file
pub fn parse(source: &str) -> Result<BsdlDescription> {
    let tokens = lexer::tokenize(source)?;
    let entity = parser::parse_entity(&tokens)?;
    let attrs = Attributes { entity: &entity };

    let instruction_length = attrs.int("INSTRUCTION_LENGTH")?;
    if instruction_length == 0 {
        return Err(Error::bsdl(entity.line, "INSTRUCTION_LENGTH must be at least 1"));
    }
    let (opcodes, line) = attrs.required_text("INSTRUCTION_OPCODE")?;
    let instructions = boundary::parse_opcodes(opcodes, line)?;
    for inst in &instructions {
        if let Some(code) = inst.opcodes.iter().find(|c| c.len() != instruction_length) {
            return Err(Error::bsdl(
                line,
                format!("opcode {} of {} is not {} bits long", code, inst.name, instruction_length),
            ));
        }
    }
    for required in ["BYPASS", "EXTEST"] {
        if !instructions.iter().any(|i| i.name.eq_ignore_ascii_case(required)) {
            return Err(Error::bsdl(line, format!("missing mandatory instruction {}", required)));
        }
    }
    if !instructions
        .iter()
        .any(|i| SAMPLE_NAMES.iter().any(|n| i.name.eq_ignore_ascii_case(n)))
    {
        return Err(Error::bsdl(line, "missing mandatory instruction SAMPLE"));
    }

    let instruction_capture = attrs
        .text("INSTRUCTION_CAPTURE")?
        .map(|(s, _)| normalize_port(s));

    let idcode = match attrs.text("IDCODE_REGISTER")? {
        Some((bits, line)) => Some(IdCodePattern::from_bsdl_bits(bits).map_err(|e| relocate(e, line))?),
        None => None,
    };

    let boundary_length = attrs.int("BOUNDARY_LENGTH")?;
    if boundary_length > MAX_BOUNDARY_LENGTH {
        let (_, line) = attrs.required("BOUNDARY_LENGTH")?;
        return Err(Error::bsdl(
            line,
            format!("BOUNDARY_LENGTH {} exceeds {} cells", boundary_length, MAX_BOUNDARY_LENGTH),
        ));
    }
    let (cell_text, cells_line) = attrs.required_text("BOUNDARY_REGISTER")?;
    let parsed_cells = boundary::parse_cells(cell_text, cells_line)?;

    let mut slots: Vec<Option<BoundaryCell>> = vec![None; boundary_length];
    for cell in parsed_cells {
        let number = cell.number;
        let slot = slots.get_mut(number).ok_or_else(|| {
            Error::bsdl(
                cells_line,
                format!("cell {} outside BOUNDARY_LENGTH {}", number, boundary_length),
            )
        })?;
        if slot.is_some() {
            return Err(Error::bsdl(cells_line, format!("cell {} defined twice", number)));
        }
        if let Some(ctrl) = cell.control {
            if ctrl.cell >= boundary_length {
                return Err(Error::bsdl(
                    cells_line,
                    format!("cell {} refers to control cell {} outside the register", number, ctrl.cell),
                ));
            }
        }
        *slot = Some(cell);
    }
    // Cells the file leaves out behave as internal cells
    let cells: Vec<BoundaryCell> = slots
        .into_iter()
        .enumerate()
        .map(|(number, slot)| {
            slot.unwrap_or_else(|| BoundaryCell {
                number,
                cell_type: "BC_1".to_string(),
                port: None,
                function: CellFunction::Internal,
                safe: None,
                control: None,
            })
        })
        .collect();

    let ports = expand_ports(&entity)?;
    let mut by_lower: HashMap<String, usize> = HashMap::new();
    let mut pins = Vec::new();
    let mut modes = Vec::new();
    for (name, mode) in ports {
        if mode == PortMode::Linkage {
            continue;
        }
        if by_lower.insert(name.to_ascii_lowercase(), pins.len()).is_some() {
            return Err(Error::bsdl(entity.line, format!("port {} declared twice", name)));
        }
        pins.push(PinDef {
            name,
            direction: PinDirection::Input,
            input_cell: None,
            output_cell: None,
            control: None,
            control_cells: Vec::new(),
            package_pins: Vec::new(),
        });
        modes.push(mode);
    }

    for cell in &cells {
        let Some(port) = &cell.port else {
            continue;
        };
        let Some(&index) = by_lower.get(&port.to_ascii_lowercase()) else {
            return Err(Error::bsdl(
                cells_line,
                format!("cell {} refers to undeclared port {}", cell.number, port),
            ));
        };
        let pin = &mut pins[index];
        if cell.function.observes_pin() && pin.input_cell.is_none() {
            pin.input_cell = Some(cell.number);
        }
        if cell.function.drives_pin() && pin.output_cell.is_none() {
            pin.output_cell = Some(cell.number);
            pin.control = cell.control;
        }
        if cell.function.is_control() {
            pin.control_cells.push(cell.number);
        }
    }

    for (pin, mode) in pins.iter_mut().zip(&modes) {
        pin.direction = match (pin.input_cell, pin.output_cell) {
            (Some(_), Some(_)) => PinDirection::Bidirectional,
            (None, Some(_)) => PinDirection::Output,
            (Some(_), None) => PinDirection::Input,
            (None, None) if !pin.control_cells.is_empty() => PinDirection::Control,
            (None, None) => match mode {
                PortMode::In => PinDirection::Input,
                PortMode::Out | PortMode::Buffer => PinDirection::Output,
                PortMode::InOut => PinDirection::Bidirectional,
                PortMode::Linkage => PinDirection::Input,
            },
        };
    }

    let (package, map) = pin_map(&entity)?;
    for (port, package_pins) in map {
        let key = normalize_port(&port).to_ascii_lowercase();
        if let Some(&index) = by_lower.get(&key) {
            pins[index].package_pins = package_pins;
            continue;
        }
        // A bit-vector port maps its elements in declaration order
        let prefix = format!("{}(", key);
        let elements: Vec<usize> = pins
            .iter()
            .enumerate()
            .filter(|(_, p)| p.name.to_ascii_lowercase().starts_with(&prefix))
            .map(|(i, _)| i)
            .collect();
        for (index, package_pin) in elements.into_iter().zip(package_pins) {
            pins[index].package_pins = vec![package_pin];
        }
    }

    let pin_lookup = pins
        .iter()
        .enumerate()
        .map(|(i, p)| (p.name.clone(), i))
        .collect();

    log::debug!(
        "parsed BSDL entity {}: {} pins, {} boundary cells, IR length {}",
        entity.name,
        pins.len(),
        cells.len(),
        instruction_length
    );

    Ok(BsdlDescription {
        entity: entity.name,
        package,
        idcode,
        instruction_length,
        instructions,
        instruction_capture,
        boundary_length,
        cells,
        pins,
        pin_lookup,
    })
}

/// Read and parse a BSDL file
pub fn parse_file(path: impl AsRef<Path>) -> Result<BsdlDescription> {
    let text = std::fs::read_to_string(path)?;
    parse(&text)
}

/// The device ID pattern of a description, for matching against scanned IDCODEs
pub fn extract_devid(description: &BsdlDescription) -> Result<IdCodePattern> {
    description.idcode.ok_or_else(|| {
        Error::bsdl(0, format!("entity {} has no IDCODE_REGISTER", description.entity))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHIP: &str = r#"
-- A small device with one of everything
entity CHIP is
  generic (PHYSICAL_PIN_MAP : string := "QFN16");
  port (
    TCK, TMS, TDI : in bit;
    TDO  : out bit;
    OE_N : in bit;
    IRQ  : out bit;
    D    : inout bit_vector(1 downto 0);
    LED  : buffer bit;
    VDD  : linkage bit
  );
  use STD_1149_1_2001.all;
  attribute COMPONENT_CONFORMANCE of CHIP : entity is "STD_1149_1_2001";
  attribute PIN_MAP of CHIP : entity is PHYSICAL_PIN_MAP;
  constant QFN16 : PIN_MAP_STRING :=
    "TCK:1, TMS:2, TDI:3, TDO:4, OE_N:5, IRQ:6, D:(8, 7), LED:9, VDD:(10, 16)";
  attribute TAP_SCAN_CLOCK of TCK : signal is (10.0e6, BOTH);
  attribute INSTRUCTION_LENGTH of CHIP : entity is 3;
  attribute INSTRUCTION_OPCODE of CHIP : entity is
    "BYPASS (111)," &
    "EXTEST (000)," &
    "SAMPLE (001)," &
    "IDCODE (010)";
  attribute INSTRUCTION_CAPTURE of CHIP : entity is "001";
  attribute IDCODE_REGISTER of CHIP : entity is
    "XXXX" & "0000000000010010" & "00000011100" & "1";
  attribute BOUNDARY_LENGTH of CHIP : entity is 9;
  attribute BOUNDARY_REGISTER of CHIP : entity is
    "7 (BC_1, *, CONTROL, 1), " &
    "6 (BC_7, D(1), BIDIR, X, 7, 1, Z), " &
    "5 (BC_7, D(0), BIDIR, X, 7, 1, Z), " &
    "4 (BC_1, IRQ, OUTPUT2, 0), " &
    "3 (BC_1, OE_N, CONTROL, 1), " &
    "2 (BC_4, TCK, INPUT, X), " &
    "1 (BC_1, LED, OUTPUT3, X, 0, 0, WEAK0), " &
    "0 (BC_1, *, CONTROL, 0)";
end CHIP;
"#;

    #[test]
    fn parses_structure() {
        let d = parse(CHIP).unwrap();
        assert_eq!(d.entity(), "CHIP");
        assert_eq!(d.package(), Some("QFN16"));
        assert_eq!(d.instruction_length(), 3);
        assert_eq!(d.boundary_length(), 9);
        assert_eq!(d.cells().len(), 9);
        assert_eq!(d.cells()[0].function, CellFunction::Control);
        // Left out of the register string
        assert_eq!(d.cells()[8].function, CellFunction::Internal);
        assert_eq!(d.instruction_capture(), Some("001"));
        // VDD is linkage
        assert_eq!(d.pins().len(), 9);
        assert!(d.pin("VDD").is_none());
    }

    #[test]
    fn pin_directions() {
        let d = parse(CHIP).unwrap();
        assert_eq!(d.pin("TCK").unwrap().direction, PinDirection::Input);
        assert_eq!(d.pin("TDO").unwrap().direction, PinDirection::Output);
        assert_eq!(d.pin("IRQ").unwrap().direction, PinDirection::Output);
        assert_eq!(d.pin("OE_N").unwrap().direction, PinDirection::Control);
        assert_eq!(d.pin("D(1)").unwrap().direction, PinDirection::Bidirectional);
        assert_eq!(d.pin("LED").unwrap().direction, PinDirection::Output);
        assert!(d.pin("LED").unwrap().can_tristate());
        assert!(!d.pin("IRQ").unwrap().can_tristate());
    }

    #[test]
    fn pin_names_are_case_sensitive() {
        let d = parse(CHIP).unwrap();
        assert!(d.pin("led").is_none());
        assert_eq!(d.pin_index("D(1)"), Some(6));
        assert_eq!(d.pin_index("D(0)"), Some(7));
    }

    #[test]
    fn package_pins() {
        let d = parse(CHIP).unwrap();
        assert_eq!(d.pin("D(1)").unwrap().package_pins, vec!["8".to_string()]);
        assert_eq!(d.pin("D(0)").unwrap().package_pins, vec!["7".to_string()]);
        assert_eq!(d.pin("LED").unwrap().package_pins, vec!["9".to_string()]);
    }

    #[test]
    fn opcodes_and_idcode() {
        let d = parse(CHIP).unwrap();
        assert_eq!(d.opcode("extest"), Some(vec![false, false, false]));
        assert_eq!(d.sample_opcode(), Some(vec![true, false, false]));
        assert_eq!(d.decode_instruction(&[false, true, false]), Some("IDCODE"));
        let id = extract_devid(&d).unwrap();
        assert!(id.matches(0x0001_2039));
        assert!(id.matches(0xF001_2039));
        assert!(!id.matches(0x0001_2038));
    }

    #[test]
    fn safe_register_disables_outputs() {
        let d = parse(CHIP).unwrap();
        let reg = d.safe_register();
        assert!(reg[7], "shared control cell disables D");
        assert!(!reg[0], "LED is disabled by a 0");
        assert!(!d.pin("D(0)").unwrap().output_enabled(&reg));
        assert!(!d.pin("LED").unwrap().output_enabled(&reg));
        assert!(d.pin("IRQ").unwrap().output_enabled(&reg));
    }

    #[test]
    fn deterministic() {
        assert_eq!(parse(CHIP).unwrap(), parse(CHIP).unwrap());
    }

    #[test]
    fn missing_mandatory_clauses() {
        for attr in ["INSTRUCTION_LENGTH", "INSTRUCTION_OPCODE", "BOUNDARY_LENGTH", "BOUNDARY_REGISTER"] {
            let text = CHIP.replace(&format!("attribute {} of", attr), "attribute SOMETHING_ELSE of");
            let err = parse(&text).unwrap_err();
            match err {
                Error::MalformedBsdl { message, .. } => assert!(message.contains(attr), "{}", message),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn missing_port_clause() {
        let start = CHIP.find("port (").unwrap();
        let end = CHIP.find("use STD").unwrap();
        let text = format!("{}{}", &CHIP[..start], &CHIP[end..]);
        assert!(matches!(parse(&text), Err(Error::MalformedBsdl { .. })));
    }

    #[test]
    fn unknown_direction_keyword() {
        let text = CHIP.replace("IRQ  : out bit", "IRQ  : outward bit");
        assert!(matches!(parse(&text), Err(Error::MalformedBsdl { .. })));
    }

    #[test]
    fn unbalanced_groupings() {
        let text = CHIP.replace("D    : inout bit_vector(1 downto 0);", "D : inout bit_vector(1 downto 0;");
        assert!(matches!(parse(&text), Err(Error::MalformedBsdl { .. })));
    }

    #[test]
    fn cell_referencing_unknown_port() {
        let text = CHIP.replace("IRQ, OUTPUT2", "NMI, OUTPUT2");
        assert!(matches!(parse(&text), Err(Error::MalformedBsdl { .. })));
    }

    #[test]
    fn cell_outside_register() {
        let text = CHIP.replace("BOUNDARY_LENGTH of CHIP : entity is 9", "BOUNDARY_LENGTH of CHIP : entity is 7");
        assert!(matches!(parse(&text), Err(Error::MalformedBsdl { .. })));
    }

    #[test]
    fn oversized_boundary_register() {
        let text = CHIP.replace(
            "BOUNDARY_LENGTH of CHIP : entity is 9",
            "BOUNDARY_LENGTH of CHIP : entity is 1000000000000000000",
        );
        match parse(&text) {
            Err(Error::MalformedBsdl { message, .. }) => assert!(message.contains("exceeds"), "{}", message),
            other => panic!("unexpected {:?}", other.map(|d| d.entity().to_string())),
        }
    }

    #[test]
    fn missing_extest() {
        let text = CHIP.replace("\"EXTEST (000),\" &", "");
        assert!(matches!(parse(&text), Err(Error::MalformedBsdl { .. })));
    }

    #[test]
    fn no_idcode() {
        let start = CHIP.find("attribute IDCODE_REGISTER").unwrap();
        let end = CHIP.find("attribute BOUNDARY_LENGTH").unwrap();
        let text = format!("{}{}", &CHIP[..start], &CHIP[end..]);
        let d = parse(&text).unwrap();
        assert!(d.idcode().is_none());
        assert!(extract_devid(&d).is_err());
    }
}
