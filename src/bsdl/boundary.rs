//! Parsers for the string-valued attributes: `BOUNDARY_REGISTER`, `INSTRUCTION_OPCODE` and the
//! physical pin map constant.
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellFunction {
    Input,
    Clock,
    Output2,
    Output3,
    Control,
    ControlR,
    Internal,
    Bidir,
    ObserveOnly,
}

impl CellFunction {
    fn from_keyword(s: &str) -> Option<Self> {
        Some(match s.to_ascii_uppercase().as_str() {
            "INPUT" => CellFunction::Input,
            "CLOCK" => CellFunction::Clock,
            "OUTPUT2" => CellFunction::Output2,
            "OUTPUT3" => CellFunction::Output3,
            "CONTROL" => CellFunction::Control,
            "CONTROLR" => CellFunction::ControlR,
            "INTERNAL" => CellFunction::Internal,
            "BIDIR" => CellFunction::Bidir,
            "OBSERVE_ONLY" => CellFunction::ObserveOnly,
            _ => return None,
        })
    }

    pub fn observes_pin(&self) -> bool {
        matches!(
            self,
            CellFunction::Input | CellFunction::Clock | CellFunction::Bidir | CellFunction::ObserveOnly
        )
    }

    pub fn drives_pin(&self) -> bool {
        matches!(self, CellFunction::Output2 | CellFunction::Output3 | CellFunction::Bidir)
    }

    pub fn is_control(&self) -> bool {
        matches!(self, CellFunction::Control | CellFunction::ControlR)
    }
}

/// What a disabled output looks like from outside the device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisableResult {
    HighZ,
    Weak0,
    Weak1,
    Pull0,
    Pull1,
    Keeper,
}

impl DisableResult {
    fn from_keyword(s: &str) -> Option<Self> {
        Some(match s.to_ascii_uppercase().as_str() {
            "Z" => DisableResult::HighZ,
            "WEAK0" => DisableResult::Weak0,
            "WEAK1" => DisableResult::Weak1,
            "PULL0" => DisableResult::Pull0,
            "PULL1" => DisableResult::Pull1,
            "KEEPER" => DisableResult::Keeper,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlRef {
    /// Boundary register index of the control cell
    pub cell: usize,
    /// Control cell value that disables the output
    pub disable_value: bool,
    pub result: DisableResult,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundaryCell {
    pub number: usize,
    /// Cell design, e.g. `BC_1`
    pub cell_type: String,
    /// Port (or bit-vector element) the cell serves, `None` for `*`
    pub port: Option<String>,
    pub function: CellFunction,
    /// Safe value, `None` for `X`
    pub safe: Option<bool>,
    pub control: Option<ControlRef>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub name: String,
    /// Opcodes as written in the file, most significant bit first
    pub opcodes: Vec<String>,
}

/// Split on `sep` outside parentheses.  Empty trailing pieces (from a trailing comma) are dropped.
fn split_top_level(text: &str, sep: char, line: usize) -> Result<Vec<&str>> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| Error::bsdl(line, "unbalanced parentheses in attribute string"))?;
            }
            c if c == sep && depth == 0 => {
                pieces.push(text[start..i].trim());
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(Error::bsdl(line, "unbalanced parentheses in attribute string"));
    }
    pieces.push(text[start..].trim());
    while pieces.last() == Some(&"") {
        pieces.pop();
    }
    Ok(pieces)
}

/// Split `NAME (inner)` into its head and the text between the outer parentheses
fn head_and_group(entry: &str, line: usize) -> Result<(&str, &str)> {
    let open = entry
        .find('(')
        .ok_or_else(|| Error::bsdl(line, format!("expected `(` in `{}`", entry)))?;
    let inner = entry[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| Error::bsdl(line, format!("expected `)` at the end of `{}`", entry)))?;
    Ok((entry[..open].trim(), inner))
}

/// Remove whitespace from a port reference so `D (3)` and `D(3)` compare equal
pub(crate) fn normalize_port(name: &str) -> String {
    name.chars().filter(|c| !c.is_whitespace()).collect()
}

fn parse_bit(s: &str) -> Option<Option<bool>> {
    match s {
        "0" => Some(Some(false)),
        "1" => Some(Some(true)),
        "x" | "X" => Some(None),
        _ => None,
    }
}

pub(crate) fn parse_cells(text: &str, line: usize) -> Result<Vec<BoundaryCell>> {
    let mut cells = Vec::new();
    for entry in split_top_level(text, ',', line)? {
        let (num, inner) = head_and_group(entry, line)?;
        let number = num
            .parse::<usize>()
            .map_err(|_| Error::bsdl(line, format!("bad cell number `{}`", num)))?;
        let fields = split_top_level(inner, ',', line)?;
        if fields.len() != 4 && fields.len() != 7 {
            return Err(Error::bsdl(
                line,
                format!("cell {} has {} fields, expected 4 or 7", number, fields.len()),
            ));
        }

        let port = match fields[1] {
            "*" => None,
            p => Some(normalize_port(p)),
        };
        let function = CellFunction::from_keyword(fields[2]).ok_or_else(|| {
            Error::bsdl(line, format!("cell {}: unknown function `{}`", number, fields[2]))
        })?;
        let safe = parse_bit(fields[3]).ok_or_else(|| {
            Error::bsdl(line, format!("cell {}: bad safe value `{}`", number, fields[3]))
        })?;

        let control = if fields.len() == 7 {
            let cell = fields[4].parse::<usize>().map_err(|_| {
                Error::bsdl(line, format!("cell {}: bad control cell `{}`", number, fields[4]))
            })?;
            let disable_value = match parse_bit(fields[5]) {
                Some(Some(v)) => v,
                _ => {
                    return Err(Error::bsdl(
                        line,
                        format!("cell {}: bad disable value `{}`", number, fields[5]),
                    ))
                }
            };
            let result = DisableResult::from_keyword(fields[6]).ok_or_else(|| {
                Error::bsdl(line, format!("cell {}: bad disable result `{}`", number, fields[6]))
            })?;
            Some(ControlRef {
                cell,
                disable_value,
                result,
            })
        } else {
            None
        };

        cells.push(BoundaryCell {
            number,
            cell_type: fields[0].to_string(),
            port,
            function,
            safe,
            control,
        });
    }
    Ok(cells)
}

pub(crate) fn parse_opcodes(text: &str, line: usize) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    for entry in split_top_level(text, ',', line)? {
        let (name, inner) = head_and_group(entry, line)?;
        if name.is_empty() {
            return Err(Error::bsdl(line, format!("instruction without a name: `{}`", entry)));
        }
        let opcodes = split_top_level(inner, ',', line)?
            .into_iter()
            .map(|code| {
                let code = normalize_port(code);
                if code.is_empty() || !code.chars().all(|c| matches!(c, '0' | '1' | 'x' | 'X')) {
                    Err(Error::bsdl(line, format!("instruction {}: bad opcode `{}`", name, code)))
                } else {
                    Ok(code)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        instructions.push(Instruction {
            name: name.to_string(),
            opcodes,
        });
    }
    Ok(instructions)
}

/// Parse a `PIN_MAP_STRING`: `PORT:PIN, VEC:(PIN, PIN), ...`
pub(crate) fn parse_pin_map(text: &str, line: usize) -> Result<Vec<(String, Vec<String>)>> {
    let mut map = Vec::new();
    for entry in split_top_level(text, ',', line)? {
        let (port, pins) = entry
            .split_once(':')
            .ok_or_else(|| Error::bsdl(line, format!("expected `:` in pin map entry `{}`", entry)))?;
        let pins = pins.trim();
        let pins = match pins.strip_prefix('(').and_then(|p| p.strip_suffix(')')) {
            Some(list) => split_top_level(list, ',', line)?
                .into_iter()
                .map(str::to_string)
                .collect(),
            None => vec![pins.to_string()],
        };
        map.push((port.trim().to_string(), pins));
    }
    Ok(map)
}
