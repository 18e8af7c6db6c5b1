//! Boundary tables and grade lookup
//!
//! A table is an ordered list of [`GradeInterval`] rows. Lookup scans the
//! rows in stored order and returns the first whose half-open hue, chroma
//! and lightness ranges all contain the measured values.
//!
//! Two CSV layouts are understood, both with one header row and quotes
//! ignored:
//!
//! - boundary: `hue_min, hue_max, chroma_min, chroma_max, l_min, l_max,
//!   grade, reference, version, family, hue_description`
//! - loose fancy: `hue_min, hue_max, chroma_min, chroma_max, l_min, l_max,
//!   lightness_grade, hue_description, reference, version, _, multi_color`

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::proportion::{ShapeGroup, StoneFamily};
use crate::constants::grading::NOT_AVAILABLE;
use crate::error::{GradingError, Result};

/// Grade label whose chroma floor stays put when a shift is applied
const SHIFT_ANCHORED_GRADE: &str = "D";

/// Half-open interval `[min, max)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value < self.max
    }

    fn intersects(&self, other: &Range) -> bool {
        self.min < other.max && other.min < self.max
    }
}

/// How a table expects hue angles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HueConvention {
    /// `atan2` output folded onto -180..180; +180 is read as -180
    #[default]
    Signed,
    /// 0..360; negative hues are shifted by a full turn before lookup
    Unsigned,
}

impl HueConvention {
    pub fn normalize(&self, hue: f64) -> f64 {
        match self {
            HueConvention::Signed if hue >= 180.0 => hue - 360.0,
            HueConvention::Signed => hue,
            HueConvention::Unsigned if hue < 0.0 => hue + 360.0,
            HueConvention::Unsigned => hue,
        }
    }
}

/// Row family in the boundary CSV
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableFamily {
    Round,
    Fancy,
    FancyHH,
}

impl TableFamily {
    fn parse(field: &str) -> Option<Self> {
        match field {
            f if f.eq_ignore_ascii_case("Round") => Some(TableFamily::Round),
            f if f.eq_ignore_ascii_case("Fancy") => Some(TableFamily::Fancy),
            f if f.eq_ignore_ascii_case("FancyHH") => Some(TableFamily::FancyHH),
            _ => None,
        }
    }
}

/// One calibration table row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeInterval {
    pub hue: Range,
    pub chroma: Range,
    pub lightness: Range,
    /// Grade label (chroma grade, or lightness grade in loose tables)
    pub grade: String,
    pub hue_description: String,
    /// Row marks a reference stone that must be confirmed visually
    pub reference: bool,
    pub version: String,
    pub multi_color: bool,
}

impl GradeInterval {
    pub fn contains(&self, hue: f64, chroma: f64, lightness: f64) -> bool {
        self.hue.contains(hue) && self.chroma.contains(chroma) && self.lightness.contains(lightness)
    }

    /// Chroma range after applying a shift
    pub fn shifted_chroma(&self, shift: f64) -> Range {
        if self.grade == SHIFT_ANCHORED_GRADE {
            Range::new(self.chroma.min, self.chroma.max + shift)
        } else {
            Range::new(self.chroma.min + shift, self.chroma.max + shift)
        }
    }

    fn overlaps(&self, other: &GradeInterval) -> bool {
        self.hue.intersects(&other.hue)
            && self.chroma.intersects(&other.chroma)
            && self.lightness.intersects(&other.lightness)
    }
}

/// Ordered rows with first-match lookup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradeTable {
    rows: Vec<GradeInterval>,
    hue_convention: HueConvention,
}

impl GradeTable {
    pub fn new(rows: Vec<GradeInterval>) -> Self {
        Self {
            rows,
            hue_convention: HueConvention::default(),
        }
    }

    pub fn with_hue_convention(mut self, convention: HueConvention) -> Self {
        self.hue_convention = convention;
        self
    }

    pub fn hue_convention(&self) -> HueConvention {
        self.hue_convention
    }

    pub fn rows(&self) -> &[GradeInterval] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Version string of the first row
    pub fn version(&self) -> Option<&str> {
        self.rows.first().map(|r| r.version.as_str())
    }

    /// First row containing `(hue, chroma, lightness)`
    pub fn lookup(&self, hue: f64, chroma: f64, lightness: f64) -> Option<&GradeInterval> {
        let hue = self.hue_convention.normalize(hue);
        self.rows.iter().find(|r| r.contains(hue, chroma, lightness))
    }

    /// First-match lookup with every chroma range moved by `shift`.
    ///
    /// Rows graded "D" keep their lower chroma bound and only widen upward.
    pub fn lookup_shifted(
        &self,
        hue: f64,
        chroma: f64,
        lightness: f64,
        shift: f64,
    ) -> Option<&GradeInterval> {
        if shift == 0.0 {
            return self.lookup(hue, chroma, lightness);
        }
        let hue = self.hue_convention.normalize(hue);
        self.rows.iter().find(|r| {
            r.hue.contains(hue)
                && r.shifted_chroma(shift).contains(chroma)
                && r.lightness.contains(lightness)
        })
    }

    /// Index pairs of rows whose boxes intersect; the earlier row shadows
    /// the later one where they do
    pub fn overlaps(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for (i, a) in self.rows.iter().enumerate() {
            for (j, b) in self.rows.iter().enumerate().skip(i + 1) {
                if a.overlaps(b) {
                    pairs.push((i, j));
                }
            }
        }
        pairs
    }

    /// Parse a loose-fancy CSV
    pub fn parse_loose_csv(text: &str) -> Result<Self> {
        let mut rows = Vec::new();
        for (line, fields) in records(text) {
            require_columns(line, &fields, 10)?;
            let (hue, chroma, lightness) = parse_ranges(line, &fields)?;
            rows.push(GradeInterval {
                hue,
                chroma,
                lightness,
                grade: fields[6].to_string(),
                hue_description: fields[7].to_string(),
                reference: is_reference(fields[8]),
                version: fields[9].to_string(),
                multi_color: fields.get(11).is_some_and(|f| f.eq_ignore_ascii_case("TRUE")),
            });
        }
        let table = GradeTable::new(rows);
        table.warn_overlaps("loose");
        Ok(table)
    }

    fn warn_overlaps(&self, name: &str) {
        let overlaps = self.overlaps();
        if !overlaps.is_empty() {
            warn!(
                table = name,
                count = overlaps.len(),
                first = ?overlaps[0],
                "boundary rows overlap; earlier rows take precedence"
            );
        }
    }
}

/// Labels resolved for one measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeOutcome {
    pub grade: String,
    pub hue_description: String,
    pub lightness_description: String,
    pub reference: bool,
    pub version: String,
    pub multi_color: bool,
}

impl GradeOutcome {
    /// Sentinel outcome when no row matches
    pub fn not_available(version: impl Into<String>) -> Self {
        Self {
            grade: NOT_AVAILABLE.to_string(),
            hue_description: NOT_AVAILABLE.to_string(),
            lightness_description: NOT_AVAILABLE.to_string(),
            reference: false,
            version: version.into(),
            multi_color: false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.grade != NOT_AVAILABLE
    }

    fn from_row(row: &GradeInterval) -> Self {
        Self {
            grade: row.grade.clone(),
            hue_description: row.hue_description.clone(),
            lightness_description: NOT_AVAILABLE.to_string(),
            reference: row.reference,
            version: row.version.clone(),
            multi_color: row.multi_color,
        }
    }
}

/// All boundary tables of a station
#[derive(Debug, Clone, Default)]
pub struct GradeTables {
    pub round: GradeTable,
    pub fancy: GradeTable,
    pub fancy_hh: GradeTable,
    pub loose: Option<GradeTable>,
    checksum: String,
    loose_checksum: Option<String>,
}

impl GradeTables {
    pub fn new(round: GradeTable, fancy: GradeTable, fancy_hh: GradeTable) -> Self {
        Self {
            round,
            fancy,
            fancy_hh,
            loose: None,
            checksum: String::new(),
            loose_checksum: None,
        }
    }

    pub fn with_loose(mut self, loose: GradeTable) -> Self {
        self.loose = Some(loose);
        self
    }

    /// Parse the combined round/fancy boundary CSV
    pub fn parse_boundary_csv(text: &str) -> Result<Self> {
        let mut round = Vec::new();
        let mut fancy = Vec::new();
        let mut fancy_hh = Vec::new();

        for (line, fields) in records(text) {
            require_columns(line, &fields, 11)?;
            let (hue, chroma, lightness) = parse_ranges(line, &fields)?;
            let family =
                TableFamily::parse(fields[9]).ok_or_else(|| GradingError::CalibrationError {
                    line,
                    reason: format!("unknown table family '{}'", fields[9]),
                })?;
            let row = GradeInterval {
                hue,
                chroma,
                lightness,
                grade: fields[6].to_string(),
                hue_description: fields[10].to_string(),
                reference: is_reference(fields[7]),
                version: fields[8].to_string(),
                multi_color: false,
            };
            match family {
                TableFamily::Round => round.push(row),
                TableFamily::Fancy => fancy.push(row),
                TableFamily::FancyHH => fancy_hh.push(row),
            }
        }

        let mut tables = GradeTables::new(
            GradeTable::new(round),
            GradeTable::new(fancy),
            GradeTable::new(fancy_hh),
        );
        tables.checksum = sha256_hex(text.as_bytes());
        tables.round.warn_overlaps("round");
        tables.fancy.warn_overlaps("fancy");
        tables.fancy_hh.warn_overlaps("fancy_hh");
        debug!(
            round = tables.round.len(),
            fancy = tables.fancy.len(),
            fancy_hh = tables.fancy_hh.len(),
            "boundary table parsed"
        );
        Ok(tables)
    }

    pub fn from_boundary_file(path: &Path) -> Result<Self> {
        let text = read_table(path)?;
        Self::parse_boundary_csv(&text)
    }

    /// Attach the loose-fancy table from a CSV file
    pub fn load_loose_file(&mut self, path: &Path) -> Result<()> {
        let text = read_table(path)?;
        self.loose = Some(GradeTable::parse_loose_csv(&text)?);
        self.loose_checksum = Some(sha256_hex(text.as_bytes()));
        Ok(())
    }

    /// Apply one hue convention to every table
    pub fn with_hue_convention(mut self, convention: HueConvention) -> Self {
        self.round.hue_convention = convention;
        self.fancy.hue_convention = convention;
        self.fancy_hh.hue_convention = convention;
        if let Some(loose) = self.loose.as_mut() {
            loose.hue_convention = convention;
        }
        self
    }

    /// SHA-256 of the boundary CSV, hex encoded; empty for in-memory tables
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn loose_checksum(&self) -> Option<&str> {
        self.loose_checksum.as_deref()
    }

    /// Version string of the round table, or "N/A"
    pub fn version(&self) -> &str {
        self.round
            .version()
            .or_else(|| self.fancy.version())
            .unwrap_or(NOT_AVAILABLE)
    }

    /// Table used for a shape group
    pub fn table_for(&self, group: ShapeGroup) -> &GradeTable {
        match group.family() {
            Some(StoneFamily::Rbc) => &self.round,
            Some(StoneFamily::FancyHH) if !self.fancy_hh.is_empty() => &self.fancy_hh,
            _ => &self.fancy,
        }
    }

    /// Resolve labels for calibrated `(hue, chroma, lightness)`.
    ///
    /// With `use_loose` and a loose table present, the lightness grade, hue
    /// description and multi-color flag come from the loose table.
    pub fn grade(
        &self,
        hue: f64,
        chroma: f64,
        lightness: f64,
        group: ShapeGroup,
        chroma_shift: f64,
        use_loose: bool,
    ) -> GradeOutcome {
        let table = self.table_for(group);
        let version = table.version().unwrap_or(NOT_AVAILABLE);

        let mut outcome = table
            .lookup_shifted(hue, chroma, lightness, chroma_shift)
            .map(GradeOutcome::from_row)
            .unwrap_or_else(|| GradeOutcome::not_available(version));

        if use_loose {
            if let Some(loose) = &self.loose {
                match loose.lookup(hue, chroma, lightness) {
                    Some(row) => {
                        outcome.lightness_description = row.grade.clone();
                        outcome.hue_description = row.hue_description.clone();
                        outcome.multi_color = row.multi_color;
                        outcome.reference |= row.reference;
                    }
                    None => {
                        outcome.lightness_description = NOT_AVAILABLE.to_string();
                    }
                }
            }
        }

        outcome
    }
}

fn read_table(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| GradingError::CalibrationError {
        line: 0,
        reason: format!("cannot read {}: {}", path.display(), e),
    })
}

/// Data lines with 1-based line numbers, header and blank lines skipped
fn records(text: &str) -> impl Iterator<Item = (usize, Vec<&str>)> {
    text.lines()
        .enumerate()
        .skip(1)
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| {
            let fields = l.split(',').map(|f| f.trim().trim_matches('"')).collect();
            (i + 1, fields)
        })
}

fn require_columns(line: usize, fields: &[&str], n: usize) -> Result<()> {
    if fields.len() < n {
        return Err(GradingError::CalibrationError {
            line,
            reason: format!("expected at least {} columns, found {}", n, fields.len()),
        });
    }
    Ok(())
}

fn parse_ranges(line: usize, fields: &[&str]) -> Result<(Range, Range, Range)> {
    let number = |idx: usize| -> Result<f64> {
        fields[idx]
            .parse::<f64>()
            .map_err(|_| GradingError::CalibrationError {
                line,
                reason: format!("column {} is not a number: '{}'", idx + 1, fields[idx]),
            })
    };
    let range = |lo: usize, axis: &str| -> Result<Range> {
        let r = Range::new(number(lo)?, number(lo + 1)?);
        if r.min >= r.max {
            return Err(GradingError::CalibrationError {
                line,
                reason: format!("empty {} range [{}, {})", axis, r.min, r.max),
            });
        }
        Ok(r)
    };
    Ok((range(0, "hue")?, range(2, "chroma")?, range(4, "lightness")?))
}

fn is_reference(field: &str) -> bool {
    !field.eq_ignore_ascii_case("FALSE")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "\
\"hue_min\",\"hue_max\",\"c_min\",\"c_max\",\"l_min\",\"l_max\",\
\"grade\",\"refer\",\"version\",\"family\",\"hue\"
-180,180,0,1.0,0,200,D,FALSE,v2.1,Round,Colorless
-180,180,1.0,2.0,0,200,E,FALSE,v2.1,Round,Colorless
-180,180,2.0,4.0,0,200,F,TRUE,v2.1,Round,Faint
0,90,0,10,0,200,Fancy Light,FALSE,v2.1,Fancy,Yellow
0,90,0,10,0,200,Fancy Deep,FALSE,v2.1,FancyHH,Yellow
";

    const LOOSE: &str = "\
h0,h1,c0,c1,l0,l1,lgrade,hue,refer,version,x,multi
0,90,0,10,0,50,Dark,Yellow,FALSE,L1,x,TRUE
0,90,0,10,50,200,Light,Yellow,FALSE,L1,x
";

    fn tables() -> GradeTables {
        GradeTables::parse_boundary_csv(BOUNDARY).unwrap()
    }

    #[test]
    fn test_parse_splits_families() {
        let t = tables();
        assert_eq!(t.round.len(), 3);
        assert_eq!(t.fancy.len(), 1);
        assert_eq!(t.fancy_hh.len(), 1);
        assert_eq!(t.version(), "v2.1");
        assert_eq!(t.checksum().len(), 64);
        assert!(t.round.rows()[2].reference);
        assert!(!t.round.rows()[0].reference);
    }

    #[test]
    fn test_half_open_bounds() {
        let t = tables();
        // lower bound matches, upper bound belongs to the next row
        assert_eq!(t.round.lookup(0.0, 1.0, 90.0).unwrap().grade, "E");
        assert_eq!(t.round.lookup(0.0, 0.999, 90.0).unwrap().grade, "D");
        assert_eq!(t.round.lookup(0.0, 2.0, 90.0).unwrap().grade, "F");
        assert!(t.round.lookup(0.0, 4.0, 90.0).is_none());
    }

    #[test]
    fn test_lookup_deterministic() {
        let t = tables();
        let a = t.grade(12.0, 1.5, 90.0, ShapeGroup::RbcNormal, 0.0, false);
        let b = t.grade(12.0, 1.5, 90.0, ShapeGroup::RbcNormal, 0.0, false);
        assert_eq!(a, b);
        assert_eq!(a.grade, "E");
    }

    #[test]
    fn test_shift_keeps_d_floor() {
        let t = tables();
        // chroma 1.2 with shift 0.5: D widens to [0, 1.5), E moves to [1.5, 2.5)
        assert_eq!(t.round.lookup_shifted(0.0, 1.2, 90.0, 0.5).unwrap().grade, "D");
        assert_eq!(t.round.lookup_shifted(0.0, 1.6, 90.0, 0.5).unwrap().grade, "E");
    }

    #[test]
    fn test_group_selects_table() {
        let t = tables();
        let fancy = t.grade(45.0, 5.0, 90.0, ShapeGroup::FancyLNormal, 0.0, false);
        assert_eq!(fancy.grade, "Fancy Light");
        let hh = t.grade(45.0, 5.0, 90.0, ShapeGroup::FancyHHNormal, 0.0, false);
        assert_eq!(hh.grade, "Fancy Deep");
    }

    #[test]
    fn test_no_match_is_sentinel() {
        let t = tables();
        let outcome = t.grade(45.0, 50.0, 90.0, ShapeGroup::RbcNormal, 0.0, false);
        assert!(!outcome.is_available());
        assert_eq!(outcome.grade, "N/A");
        assert_eq!(outcome.version, "v2.1");

        let empty = GradeTables::default();
        assert_eq!(
            empty.grade(0.0, 0.0, 0.0, ShapeGroup::Default, 0.0, false),
            GradeOutcome::not_available("N/A")
        );
    }

    #[test]
    fn test_unsigned_hue_convention() {
        let rows = vec![GradeInterval {
            hue: Range::new(270.0, 360.0),
            chroma: Range::new(0.0, 10.0),
            lightness: Range::new(0.0, 200.0),
            grade: "Violet".into(),
            hue_description: "Violet".into(),
            reference: false,
            version: "u".into(),
            multi_color: false,
        }];
        let signed = GradeTable::new(rows.clone());
        assert!(signed.lookup(-45.0, 5.0, 50.0).is_none());
        let unsigned = GradeTable::new(rows).with_hue_convention(HueConvention::Unsigned);
        assert_eq!(unsigned.lookup(-45.0, 5.0, 50.0).unwrap().grade, "Violet");
    }

    #[test]
    fn test_signed_hue_wraps_half_turn() {
        let table = GradeTable::new(vec![GradeInterval {
            hue: Range::new(-180.0, 180.0),
            chroma: Range::new(0.0, 10.0),
            lightness: Range::new(0.0, 200.0),
            grade: "D".into(),
            hue_description: "Colorless".into(),
            reference: false,
            version: "s".into(),
            multi_color: false,
        }]);
        assert_eq!(HueConvention::Signed.normalize(180.0), -180.0);
        assert_eq!(table.lookup(180.0, 5.0, 50.0).unwrap().grade, "D");
        assert_eq!(table.lookup(-180.0, 5.0, 50.0).unwrap().grade, "D");
        assert_eq!(table.lookup(179.5, 5.0, 50.0).unwrap().grade, "D");
    }

    #[test]
    fn test_loose_table() {
        let loose = GradeTable::parse_loose_csv(LOOSE).unwrap();
        assert!(loose.rows()[0].multi_color);
        assert!(!loose.rows()[1].multi_color);

        let t = tables().with_loose(loose);
        let outcome = t.grade(45.0, 5.0, 30.0, ShapeGroup::FancyLNormal, 0.0, true);
        assert_eq!(outcome.grade, "Fancy Light");
        assert_eq!(outcome.lightness_description, "Dark");
        assert!(outcome.multi_color);
    }

    #[test]
    fn test_malformed_rows_rejected() {
        let bad_number = "h\n0,x,0,1,0,1,D,FALSE,v,Round,h\n";
        assert!(matches!(
            GradeTables::parse_boundary_csv(bad_number),
            Err(GradingError::CalibrationError { line: 2, .. })
        ));

        let inverted = "h\n10,5,0,1,0,1,D,FALSE,v,Round,h\n";
        assert!(GradeTables::parse_boundary_csv(inverted).is_err());

        let short = "h\n0,1,0,1\n";
        assert!(GradeTables::parse_boundary_csv(short).is_err());

        let family = "h\n0,1,0,1,0,1,D,FALSE,v,Oval,h\n";
        assert!(GradeTables::parse_boundary_csv(family).is_err());
    }

    #[test]
    fn test_overlaps_reported() {
        let t = tables();
        assert!(t.round.overlaps().is_empty());
        let text = "h\n0,10,0,5,0,100,A,FALSE,v,Fancy,h\n5,15,0,5,0,100,B,FALSE,v,Fancy,h\n";
        let t = GradeTables::parse_boundary_csv(text).unwrap();
        assert_eq!(t.fancy.overlaps(), vec![(0, 1)]);
        // first match still wins
        assert_eq!(t.fancy.lookup(7.0, 1.0, 50.0).unwrap().grade, "A");
    }
}
