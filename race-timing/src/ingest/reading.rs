use std::fmt;

use thiserror::Error;

/// One tag read from the bridge: `<tag_id>,<antenna>` on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub tag: String,
    pub antenna: u32,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedReading {
    #[error("expected 2 comma-separated fields, found {0}")]
    FieldCount(usize),

    #[error("empty tag")]
    EmptyTag,

    #[error("antenna '{0}' is not a positive integer")]
    Antenna(String),
}

impl Reading {
    pub fn parse_line(line: &str) -> Result<Self, MalformedReading> {
        let fields: Vec<&str> = line.trim().split(',').collect();
        let [tag, antenna] = fields.as_slice() else {
            return Err(MalformedReading::FieldCount(fields.len()));
        };

        let tag = tag.trim();
        if tag.is_empty() {
            return Err(MalformedReading::EmptyTag);
        }
        let antenna = match antenna.trim().parse::<u32>() {
            Ok(antenna) if antenna > 0 => antenna,
            _ => return Err(MalformedReading::Antenna(antenna.trim().to_string())),
        };

        Ok(Self {
            tag: tag.to_string(),
            antenna,
        })
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.tag, self.antenna)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tag_and_antenna() {
        assert_eq!(
            Reading::parse_line(" 12345 , 3 ").unwrap(),
            Reading {
                tag: "12345".into(),
                antenna: 3
            }
        );
    }

    #[test]
    fn rejects_wrong_shapes() {
        assert_eq!(Reading::parse_line("12345"), Err(MalformedReading::FieldCount(1)));
        assert_eq!(Reading::parse_line("1,2,3"), Err(MalformedReading::FieldCount(3)));
        assert_eq!(Reading::parse_line(",1"), Err(MalformedReading::EmptyTag));
        assert_eq!(
            Reading::parse_line("12,zero"),
            Err(MalformedReading::Antenna("zero".into()))
        );
        assert_eq!(Reading::parse_line("12,0"), Err(MalformedReading::Antenna("0".into())));
    }

    #[test]
    fn display_matches_wire_format() {
        let reading = Reading {
            tag: "E2003412".into(),
            antenna: 4,
        };
        assert_eq!(reading.to_string(), "E2003412,4");
    }
}
