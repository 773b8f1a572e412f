//! STR read name parsing. (spec §3, §6)

use crate::error::{StrError, StrResult};

/// Extend input: `name\tmotif\tcopies\tzstart\tend`, [zstart, end) half-open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendReadName {
    pub name: String,
    pub motif: String,
    pub copies: u32,
    pub zstart: usize,
    pub end: usize,
}

/// Merge input: forward and reverse-complement orientations of the
/// annotation, `name\tfmotif\tfcopies\tfzstart\tfend\trmotif\trcopies\trzstart\trend`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReadName {
    pub name: String,
    pub fmotif: String,
    pub fcopies: u32,
    pub fzstart: usize,
    pub fend: usize,
    pub rmotif: String,
    pub rcopies: u32,
    pub rzstart: usize,
    pub rend: usize,
}

fn parse_usize(field: &str, what: &str) -> StrResult<usize> {
    field
        .parse()
        .map_err(|_| StrError::Input(format!("malformed {what}: {field:?}")))
}

fn parse_u32(field: &str, what: &str) -> StrResult<u32> {
    field
        .parse()
        .map_err(|_| StrError::Input(format!("malformed {what}: {field:?}")))
}

impl ExtendReadName {
    pub fn parse(s: &str) -> StrResult<Self> {
        let fields: Vec<&str> = s.split('\t').collect();
        if fields.len() != 5 {
            return Err(StrError::Input(format!(
                "STR read name must have 5 tab-separated fields, got {}: {s:?}",
                fields.len()
            )));
        }
        let zstart = parse_usize(fields[3], "zstart")?;
        let end = parse_usize(fields[4], "end")?;
        if end < zstart {
            return Err(StrError::Input(format!(
                "motif interval end {end} precedes zstart {zstart}"
            )));
        }
        Ok(Self {
            name: fields[0].to_string(),
            motif: fields[1].to_string(),
            copies: parse_u32(fields[2], "copies")?,
            zstart,
            end,
        })
    }
}

impl MergeReadName {
    pub fn parse(s: &str) -> StrResult<Self> {
        let fields: Vec<&str> = s.split('\t').collect();
        if fields.len() != 9 {
            return Err(StrError::Input(format!(
                "merge STR read name must have 9 tab-separated fields, got {}: {s:?}",
                fields.len()
            )));
        }
        let fzstart = parse_usize(fields[3], "fzstart")?;
        let fend = parse_usize(fields[4], "fend")?;
        let rzstart = parse_usize(fields[7], "rzstart")?;
        let rend = parse_usize(fields[8], "rend")?;
        if fend < fzstart || rend < rzstart {
            return Err(StrError::Input(
                "motif interval end precedes zstart".to_string(),
            ));
        }
        Ok(Self {
            name: fields[0].to_string(),
            fmotif: fields[1].to_string(),
            fcopies: parse_u32(fields[2], "fcopies")?,
            fzstart,
            fend,
            rmotif: fields[5].to_string(),
            rcopies: parse_u32(fields[6], "rcopies")?,
            rzstart,
            rend,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_extend_read_name() {
        let r = ExtendReadName::parse("read1\tCAG\t10\t50\t80").unwrap();
        assert_eq!(r.name, "read1");
        assert_eq!(r.motif, "CAG");
        assert_eq!(r.copies, 10);
        assert_eq!(r.zstart, 50);
        assert_eq!(r.end, 80);
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(ExtendReadName::parse("read1\tCAG\t10\t50").is_err());
    }

    #[test]
    fn rejects_inverted_interval() {
        assert!(ExtendReadName::parse("read1\tCAG\t10\t80\t50").is_err());
    }

    #[test]
    fn parses_merge_read_name() {
        let r = MergeReadName::parse("r\tCAG\t10\t10\t40\tCTG\t10\t5\t35").unwrap();
        assert_eq!(r.fmotif, "CAG");
        assert_eq!(r.rcopies, 10);
        assert_eq!(r.rzstart, 5);
        assert_eq!(r.rend, 35);
    }
}
