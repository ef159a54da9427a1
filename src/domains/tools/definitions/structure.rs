//! Atomic structures: the element table, XYZ/CIF/POSCAR readers and the
//! `atoms_dict` wire form shared by the structure tools.
//!
//! Readers never trust counts declared in a file. Atoms are collected from
//! the lines actually present, and a short file is an error.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;
use validator::Validate;

use crate::domains::tools::schema::field_error;

const ELEMENTS: [&str; 118] = [
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S", "Cl",
    "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As",
    "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In",
    "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm", "Sm", "Eu", "Gd", "Tb",
    "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", "Tl",
    "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", "Pa", "U", "Np", "Pu", "Am", "Cm", "Bk",
    "Cf", "Es", "Fm", "Md", "No", "Lr", "Rf", "Db", "Sg", "Bh", "Hs", "Mt", "Ds", "Rg", "Cn", "Nh",
    "Fl", "Mc", "Lv", "Ts", "Og",
];

/// Atomic number of an element symbol, case-insensitive.
pub fn atomic_number(symbol: &str) -> Option<u32> {
    ELEMENTS
        .iter()
        .position(|e| e.eq_ignore_ascii_case(symbol))
        .map(|i| i as u32 + 1)
}

/// Element symbol of an atomic number.
pub fn element_symbol(number: u32) -> Option<&'static str> {
    let index = usize::try_from(number).ok()?.checked_sub(1)?;
    ELEMENTS.get(index).copied()
}

/// Element from an atom label such as `Zn1`, `OW3` or `Cu2+`.
fn element_from_label(label: &str) -> Option<u32> {
    let letters: String = label.chars().take_while(char::is_ascii_alphabetic).collect();
    if letters.len() >= 2 {
        if let Some(number) = atomic_number(&letters[..2]) {
            return Some(number);
        }
    }
    letters.get(..1).and_then(atomic_number)
}

// ============================================================================
// Structures
// ============================================================================

/// A parsed structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    /// Atomic number per atom.
    pub numbers: Vec<u32>,
    /// Cartesian positions in Å.
    pub positions: Vec<[f64; 3]>,
    /// Lattice vectors as rows, for periodic structures.
    pub cell: Option<[[f64; 3]; 3]>,
    pub pbc: [bool; 3],
}

impl Structure {
    fn molecule() -> Self {
        Self {
            numbers: Vec::new(),
            positions: Vec::new(),
            cell: None,
            pbc: [false; 3],
        }
    }

    fn push(&mut self, number: u32, position: [f64; 3]) {
        self.numbers.push(number);
        self.positions.push(position);
    }

    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }

    pub fn symbols(&self) -> Vec<&'static str> {
        self.numbers.iter().filter_map(|n| element_symbol(*n)).collect()
    }

    /// Chemical formula in Hill order.
    ///
    /// With carbon present: C, then H, then the rest alphabetically.
    /// Without carbon everything is alphabetical. Counts of one are omitted.
    pub fn formula(&self) -> String {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for symbol in self.symbols() {
            *counts.entry(symbol).or_default() += 1;
        }

        let mut formula = String::new();
        let mut push = |symbol: &str, count: usize| {
            formula.push_str(symbol);
            if count > 1 {
                formula.push_str(&count.to_string());
            }
        };

        if let Some(carbon) = counts.remove("C") {
            push("C", carbon);
            if let Some(hydrogen) = counts.remove("H") {
                push("H", hydrogen);
            }
        }
        for (symbol, count) in counts {
            push(symbol, count);
        }
        formula
    }

    pub fn to_atoms_dict(&self) -> AtomsDict {
        AtomsDict {
            positions: self.positions.clone(),
            numbers: self.numbers.clone(),
            cell: self.cell,
            pbc: self.pbc,
        }
    }
}

/// JSON form of a structure, as produced by `parse_structure` and consumed
/// by the calculation tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "check_atoms", skip_on_field_errors = false))]
pub struct AtomsDict {
    /// Cartesian positions in Å, one `[x, y, z]` per atom.
    #[validate(length(min = 1))]
    pub positions: Vec<[f64; 3]>,
    /// Atomic number of each atom.
    #[validate(length(min = 1))]
    pub numbers: Vec<u32>,
    /// Lattice vectors in Å as rows; absent for molecules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell: Option<[[f64; 3]; 3]>,
    /// Periodicity along each lattice vector.
    #[serde(default)]
    pub pbc: [bool; 3],
}

impl AtomsDict {
    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }
}

fn check_atoms(atoms: &AtomsDict) -> Result<(), validator::ValidationError> {
    if atoms.numbers.len() != atoms.positions.len() {
        return Err(field_error(
            "numbers",
            "length_mismatch",
            format!(
                "{} atomic number(s) for {} position(s)",
                atoms.numbers.len(),
                atoms.positions.len()
            ),
        ));
    }
    if let Some(unknown) = atoms.numbers.iter().find(|n| element_symbol(**n).is_none()) {
        return Err(field_error(
            "numbers",
            "unknown_element",
            format!("{} is not a known atomic number", unknown),
        ));
    }
    if atoms.positions.iter().flatten().any(|v| !v.is_finite()) {
        return Err(field_error("positions", "not_finite", "coordinates must be finite"));
    }
    if atoms.cell.iter().flatten().flatten().any(|v| !v.is_finite()) {
        return Err(field_error("cell", "not_finite", "lattice vectors must be finite"));
    }
    Ok(())
}

// ============================================================================
// Formats
// ============================================================================

/// Structure file formats the readers understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureFormat {
    Cif,
    Xyz,
    Poscar,
}

impl StructureFormat {
    /// Guess the format of file content: CIF markers first, then an XYZ
    /// atom-count line, otherwise POSCAR.
    pub fn detect(content: &str) -> Self {
        if content.contains("data_") || content.contains("_cell_length_a") {
            return Self::Cif;
        }
        let first = content.trim().lines().next().unwrap_or("").trim();
        if !first.is_empty() && first.chars().all(|c| c.is_ascii_digit()) {
            Self::Xyz
        } else {
            Self::Poscar
        }
    }
}

impl fmt::Display for StructureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cif => "CIF",
            Self::Xyz => "XYZ",
            Self::Poscar => "POSCAR",
        })
    }
}

/// Parse structure content in whichever format it appears to be.
pub fn parse_structure(content: &str) -> Result<Structure, String> {
    let format = StructureFormat::detect(content);
    debug!("Reading structure as {}", format);
    match format {
        StructureFormat::Cif => parse_cif(content),
        StructureFormat::Xyz => parse_xyz(content),
        StructureFormat::Poscar => parse_poscar(content),
    }
}

/// Resolve tool input that is either structure content or a path.
///
/// Input without a newline that names an existing file is read from disk;
/// anything else is taken as content.
pub async fn load_structure_source(data: &str) -> Result<String, String> {
    let candidate = data.trim();
    let is_path = !data.contains('\n')
        && tokio::fs::metadata(candidate)
            .await
            .is_ok_and(|m| m.is_file());
    if !is_path {
        return Ok(data.to_string());
    }

    debug!("Reading structure from {}", candidate);
    tokio::fs::read_to_string(Path::new(candidate))
        .await
        .map_err(|e| format!("cannot read '{}': {}", candidate, e))
}

fn parse_float(raw: &str, what: &str, line_no: usize) -> Result<f64, String> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("line {}: invalid {} '{}'", line_no, what, raw))
}

fn parse_vector(fields: &[&str], what: &str, line_no: usize) -> Result<[f64; 3], String> {
    if fields.len() < 3 {
        return Err(format!("line {}: expected three {} values", line_no, what));
    }
    let mut vector = [0.0; 3];
    for (axis, raw) in vector.iter_mut().zip(fields) {
        *axis = parse_float(raw, what, line_no)?;
    }
    Ok(vector)
}

fn fractional_to_cartesian(frac: [f64; 3], cell: &[[f64; 3]; 3]) -> [f64; 3] {
    let mut cart = [0.0; 3];
    for (f, row) in frac.iter().zip(cell) {
        for (c, v) in cart.iter_mut().zip(row) {
            *c += f * v;
        }
    }
    cart
}

// ============================================================================
// XYZ
// ============================================================================

/// Parse the first frame of (extended) XYZ text.
///
/// A `Lattice="..."` entry on the comment line makes the structure periodic;
/// `pbc="T T F"` overrides the periodicity.
pub fn parse_xyz(text: &str) -> Result<Structure, String> {
    let mut lines = text.lines();

    let header = lines
        .next()
        .map(str::trim)
        .ok_or_else(|| "structure is empty".to_string())?;
    let count: usize = header
        .parse()
        .map_err(|_| format!("first line must be the atom count, got '{}'", header))?;
    if count == 0 {
        return Err("structure contains no atoms".to_string());
    }

    let Some(comment) = lines.next() else {
        return Err(format!("expected {} atom line(s), found 0", count));
    };

    let mut structure = Structure::molecule();
    if let Some(lattice) = quoted_value(comment, "Lattice") {
        let values = lattice
            .split_whitespace()
            .map(|v| parse_float(v, "lattice value", 2))
            .collect::<Result<Vec<_>, _>>()?;
        if values.len() != 9 {
            return Err(format!("line 2: Lattice needs 9 values, got {}", values.len()));
        }
        structure.cell = Some([
            [values[0], values[1], values[2]],
            [values[3], values[4], values[5]],
            [values[6], values[7], values[8]],
        ]);
        structure.pbc = [true; 3];
    }
    if let Some(pbc) = quoted_value(comment, "pbc") {
        let flags: Vec<bool> = pbc
            .split_whitespace()
            .map(|f| matches!(f, "T" | "t" | "True" | "true" | "1"))
            .collect();
        if let [a, b, c] = flags[..] {
            structure.pbc = [a, b, c];
        }
    }

    for (offset, line) in lines.take(count).enumerate() {
        let line_no = offset + 3;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(format!(
                "line {}: expected 'symbol x y z', got '{}'",
                line_no,
                line.trim()
            ));
        }

        let number = fields[0]
            .parse::<u32>()
            .ok()
            .filter(|n| element_symbol(*n).is_some())
            .or_else(|| atomic_number(fields[0]))
            .ok_or_else(|| format!("line {}: invalid element symbol '{}'", line_no, fields[0]))?;
        let position = parse_vector(&fields[1..4], "coordinate", line_no)?;
        structure.push(number, position);
    }

    if structure.len() < count {
        return Err(format!(
            "expected {} atom line(s), found {}",
            count,
            structure.len()
        ));
    }

    Ok(structure)
}

/// Value of `key="..."` on an extended XYZ comment line.
fn quoted_value<'a>(comment: &'a str, key: &str) -> Option<&'a str> {
    let lower = comment.to_ascii_lowercase();
    let start = lower.find(&format!("{}=\"", key.to_ascii_lowercase()))? + key.len() + 2;
    let rest = &comment[start..];
    rest.find('"').map(|end| &rest[..end])
}

// ============================================================================
// CIF
// ============================================================================

#[derive(Default)]
struct CifBlock {
    tags: HashMap<String, String>,
    loops: Vec<CifLoop>,
}

struct CifLoop {
    headers: Vec<String>,
    values: Vec<String>,
}

impl CifLoop {
    fn column(&self, tag: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == tag)
    }

    fn rows(&self) -> Result<std::slice::Chunks<'_, String>, String> {
        let width = self.headers.len();
        if width == 0 || self.values.len() % width != 0 {
            return Err(format!(
                "loop with {} column(s) has {} value(s)",
                width,
                self.values.len()
            ));
        }
        Ok(self.values.chunks(width))
    }
}

/// Split a CIF line into values, honouring quotes and `#` comments.
fn cif_tokens(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '#' {
            break;
        } else if c == '\'' || c == '"' {
            chars.next();
            let mut token = String::new();
            while let Some(next) = chars.next() {
                let closes = next == c && chars.peek().is_none_or(|a| a.is_whitespace());
                if closes {
                    break;
                }
                token.push(next);
            }
            tokens.push(token);
        } else {
            let mut token = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_whitespace() {
                    break;
                }
                token.push(next);
                chars.next();
            }
            tokens.push(token);
        }
    }
    tokens
}

/// Lines of the first data block, with `;` text fields folded into a
/// placeholder value.
fn cif_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut in_text_field = false;
    let mut blocks = 0;
    for line in text.lines() {
        if line.starts_with(';') {
            if !in_text_field {
                lines.push("?".to_string());
            }
            in_text_field = !in_text_field;
            continue;
        }
        if in_text_field {
            continue;
        }
        if line.trim_start().to_ascii_lowercase().starts_with("data_") {
            blocks += 1;
            if blocks > 1 {
                break;
            }
            continue;
        }
        lines.push(line.to_string());
    }
    lines
}

fn read_cif_block(text: &str) -> CifBlock {
    let lines = cif_lines(text);
    let mut block = CifBlock::default();
    let mut index = 0;

    let is_tag = |tokens: &[String]| tokens.first().is_some_and(|t| t.starts_with('_'));
    let is_loop = |tokens: &[String]| tokens.first().is_some_and(|t| t.eq_ignore_ascii_case("loop_"));

    while index < lines.len() {
        let tokens = cif_tokens(&lines[index]);
        index += 1;
        if tokens.is_empty() {
            continue;
        }

        if is_loop(&tokens) {
            let mut cif_loop = CifLoop {
                headers: Vec::new(),
                values: Vec::new(),
            };
            while index < lines.len() {
                let next = cif_tokens(&lines[index]);
                if next.is_empty() {
                    index += 1;
                } else if is_tag(&next) && cif_loop.values.is_empty() {
                    cif_loop.headers.push(next[0].to_ascii_lowercase());
                    cif_loop.values.extend(next.into_iter().skip(1));
                    index += 1;
                } else if is_tag(&next) || is_loop(&next) {
                    break;
                } else {
                    cif_loop.values.extend(next);
                    index += 1;
                }
            }
            block.loops.push(cif_loop);
        } else if is_tag(&tokens) {
            let tag = tokens[0].to_ascii_lowercase();
            let value = match tokens.get(1) {
                Some(value) => value.clone(),
                None => {
                    // Value on the following line.
                    let next = lines.get(index).map(|l| cif_tokens(l)).unwrap_or_default();
                    if !next.is_empty() && !is_tag(&next) && !is_loop(&next) {
                        index += 1;
                        next[0].clone()
                    } else {
                        String::new()
                    }
                }
            };
            block.tags.insert(tag, value);
        }
    }
    block
}

/// CIF number, ignoring a standard uncertainty such as `10.234(5)`.
fn cif_number(raw: &str) -> Option<f64> {
    let value = raw.split('(').next()?;
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Affine symmetry operation on fractional coordinates.
type SymmetryOp = [[f64; 4]; 3];

const IDENTITY: SymmetryOp = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
];

/// Parse an operation such as `-x+1/2, y, z+1/2`.
fn parse_symmetry_op(op: &str) -> Option<SymmetryOp> {
    let parts: Vec<&str> = op.split(',').collect();
    if parts.len() != 3 {
        return None;
    }

    let mut rows = [[0.0; 4]; 3];
    for (row, part) in rows.iter_mut().zip(parts) {
        let expr: Vec<char> = part
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if expr.is_empty() {
            return None;
        }

        let mut i = 0;
        while i < expr.len() {
            let mut sign = 1.0;
            while i < expr.len() && (expr[i] == '+' || expr[i] == '-') {
                if expr[i] == '-' {
                    sign = -sign;
                }
                i += 1;
            }
            match expr.get(i)? {
                axis @ ('x' | 'y' | 'z') => {
                    let column = (*axis as u8 - b'x') as usize;
                    row[column] += sign;
                    i += 1;
                }
                c if c.is_ascii_digit() || *c == '.' => {
                    let start = i;
                    while i < expr.len() && (expr[i].is_ascii_digit() || expr[i] == '.' || expr[i] == '/') {
                        i += 1;
                    }
                    let number: String = expr[start..i].iter().collect();
                    let value = match number.split_once('/') {
                        Some((n, d)) => n.parse::<f64>().ok()? / d.parse::<f64>().ok()?,
                        None => number.parse::<f64>().ok()?,
                    };
                    row[3] += sign * value;
                }
                _ => return None,
            }
        }
    }
    Some(rows)
}

fn apply_symmetry(op: &SymmetryOp, frac: [f64; 3]) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (value, row) in out.iter_mut().zip(op) {
        let v = row[0] * frac[0] + row[1] * frac[1] + row[2] * frac[2] + row[3];
        let wrapped = v - v.floor();
        *value = if wrapped > 1.0 - 1e-8 { 0.0 } else { wrapped };
    }
    out
}

fn same_site(a: [f64; 3], b: [f64; 3]) -> bool {
    a.iter().zip(&b).all(|(x, y)| {
        let d = x - y;
        (d - d.round()).abs() < 1e-4
    })
}

/// Cosine and sine of an angle in degrees, exact at right angles.
fn cos_sin(degrees: f64) -> (f64, f64) {
    if degrees == 90.0 {
        (0.0, 1.0)
    } else {
        let radians = degrees.to_radians();
        (radians.cos(), radians.sin())
    }
}

fn cell_from_parameters(block: &CifBlock) -> Result<[[f64; 3]; 3], String> {
    let length = |tag: &str| {
        block
            .tags
            .get(tag)
            .and_then(|v| cif_number(v))
            .filter(|v| *v > 0.0)
            .ok_or_else(|| format!("missing or invalid {}", tag))
    };
    let angle = |tag: &str| {
        block
            .tags
            .get(tag)
            .map_or(Some(90.0), |v| cif_number(v))
            .filter(|v| *v > 0.0 && *v < 180.0)
            .map(cos_sin)
            .ok_or_else(|| format!("invalid {}", tag))
    };

    let (a, b, c) = (
        length("_cell_length_a")?,
        length("_cell_length_b")?,
        length("_cell_length_c")?,
    );
    let (cos_alpha, _) = angle("_cell_angle_alpha")?;
    let (cos_beta, _) = angle("_cell_angle_beta")?;
    let (cos_gamma, sin_gamma) = angle("_cell_angle_gamma")?;

    let cx = cos_beta;
    let cy = (cos_alpha - cos_beta * cos_gamma) / sin_gamma;
    let cz_squared = 1.0 - cx * cx - cy * cy;
    if cz_squared <= 0.0 {
        return Err("cell angles do not describe a valid lattice".to_string());
    }

    Ok([
        [a, 0.0, 0.0],
        [b * cos_gamma, b * sin_gamma, 0.0],
        [c * cx, c * cy, c * cz_squared.sqrt()],
    ])
}

/// Parse the first data block of a CIF file, expanding the asymmetric unit
/// with the listed symmetry operations.
pub fn parse_cif(text: &str) -> Result<Structure, String> {
    let block = read_cif_block(text);
    let cell = cell_from_parameters(&block)?;

    let mut operations = Vec::new();
    for cif_loop in &block.loops {
        let column = cif_loop
            .column("_symmetry_equiv_pos_as_xyz")
            .or_else(|| cif_loop.column("_space_group_symop_operation_xyz"));
        if let Some(column) = column {
            for row in cif_loop.rows()? {
                let op = parse_symmetry_op(&row[column])
                    .ok_or_else(|| format!("invalid symmetry operation '{}'", row[column]))?;
                operations.push(op);
            }
        }
    }
    if operations.is_empty() {
        operations.push(IDENTITY);
    }

    let sites = block
        .loops
        .iter()
        .find(|l| l.column("_atom_site_fract_x").is_some())
        .ok_or_else(|| "no _atom_site_fract_x loop found".to_string())?;
    let fract = ["_atom_site_fract_x", "_atom_site_fract_y", "_atom_site_fract_z"]
        .map(|tag| sites.column(tag));
    let [Some(fx), Some(fy), Some(fz)] = fract else {
        return Err("atom site loop lacks fractional coordinates".to_string());
    };
    let symbol_column = sites
        .column("_atom_site_type_symbol")
        .or_else(|| sites.column("_atom_site_label"))
        .ok_or_else(|| "atom site loop lacks element symbols".to_string())?;

    let mut structure = Structure {
        cell: Some(cell),
        pbc: [true; 3],
        ..Structure::molecule()
    };

    for row in sites.rows()? {
        let label = &row[symbol_column];
        let number = element_from_label(label)
            .ok_or_else(|| format!("invalid element symbol '{}'", label))?;
        let mut site = [0.0; 3];
        for (value, column) in site.iter_mut().zip([fx, fy, fz]) {
            *value = cif_number(&row[column])
                .ok_or_else(|| format!("invalid fractional coordinate '{}'", row[column]))?;
        }

        let mut orbit: Vec<[f64; 3]> = Vec::new();
        for op in &operations {
            let image = apply_symmetry(op, site);
            if !orbit.iter().any(|seen| same_site(*seen, image)) {
                orbit.push(image);
            }
        }
        for frac in orbit {
            structure.push(number, fractional_to_cartesian(frac, &cell));
        }
    }

    if structure.is_empty() {
        return Err("structure contains no atoms".to_string());
    }
    Ok(structure)
}

// ============================================================================
// POSCAR
// ============================================================================

fn determinant(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Parse VASP POSCAR/CONTCAR text (VASP 4 or 5 layout).
///
/// VASP 4 files carry no species line; the element symbols are then taken
/// from the comment line.
pub fn parse_poscar(text: &str) -> Result<Structure, String> {
    let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l));
    let mut next = |what: &str| {
        lines
            .next()
            .ok_or_else(|| format!("POSCAR ends before the {}", what))
    };

    let (_, comment) = next("comment line")?;

    let (line_no, scale_line) = next("scale factor")?;
    let scale_raw = scale_line.split_whitespace().next().unwrap_or("");
    let scale = parse_float(scale_raw, "scale factor", line_no)?;
    if scale == 0.0 {
        return Err(format!("line {}: scale factor cannot be zero", line_no));
    }

    let mut lattice = [[0.0; 3]; 3];
    for row in lattice.iter_mut() {
        let (line_no, line) = next("lattice vectors")?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        *row = parse_vector(&fields, "lattice vector", line_no)?;
    }

    let volume = determinant(&lattice).abs();
    if volume < 1e-12 {
        return Err("lattice vectors are degenerate".to_string());
    }
    let factor = if scale < 0.0 {
        (-scale / volume).cbrt()
    } else {
        scale
    };
    let cell = lattice.map(|row| row.map(|v| v * factor));

    let (line_no, species_line) = next("species counts")?;
    let first: Vec<&str> = species_line.split_whitespace().collect();
    let (symbols, counts_line, counts_no): (Vec<String>, &str, usize) =
        if first.first().is_some_and(|t| t.parse::<usize>().is_ok()) {
            let symbols = comment.split_whitespace().map(String::from).collect();
            (symbols, species_line, line_no)
        } else {
            let (counts_no, counts_line) = next("species counts")?;
            let symbols = first
                .iter()
                .map(|s| s.split(['/', '_']).next().unwrap_or(*s).to_string())
                .collect();
            (symbols, counts_line, counts_no)
        };

    let counts = counts_line
        .split_whitespace()
        .map(|c| {
            c.parse::<usize>()
                .map_err(|_| format!("line {}: invalid species count '{}'", counts_no, c))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if symbols.len() < counts.len() {
        return Err(format!(
            "line {}: {} species count(s) but only {} element symbol(s)",
            counts_no,
            counts.len(),
            symbols.len()
        ));
    }
    let numbers = symbols[..counts.len()]
        .iter()
        .map(|s| atomic_number(s).ok_or_else(|| format!("invalid element symbol '{}'", s)))
        .collect::<Result<Vec<_>, _>>()?;
    let total = counts
        .iter()
        .try_fold(0usize, |sum, c| sum.checked_add(*c))
        .ok_or_else(|| format!("line {}: species counts overflow", counts_no))?;
    if total == 0 {
        return Err("structure contains no atoms".to_string());
    }

    let (mut line_no, mut mode) = next("coordinate mode")?;
    if mode.trim_start().starts_with(['S', 's']) {
        (line_no, mode) = next("coordinate mode")?;
    }
    let cartesian = mode.trim_start().starts_with(['C', 'c', 'K', 'k']);
    let mode_no = line_no;

    let mut structure = Structure {
        cell: Some(cell),
        pbc: [true; 3],
        ..Structure::molecule()
    };
    let species = numbers
        .iter()
        .zip(&counts)
        .flat_map(|(number, count)| std::iter::repeat_n(*number, *count));
    for (number, (line_no, line)) in species.zip(lines.by_ref()) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let raw = parse_vector(&fields, "coordinate", line_no)?;
        let position = if cartesian {
            raw.map(|v| v * factor)
        } else {
            fractional_to_cartesian(raw, &cell)
        };
        structure.push(number, position);
    }

    if structure.len() < total {
        return Err(format!(
            "expected {} position line(s) after line {}, found {}",
            total,
            mode_no,
            structure.len()
        ));
    }
    Ok(structure)
}
