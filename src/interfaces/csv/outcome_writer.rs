use crate::error::Result;
use crate::interfaces::simulation::OutcomeRecord;
use std::io::Write;

/// Writes `party,objective,outcome` rows.
pub struct OutcomeWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> OutcomeWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_outcomes(&mut self, outcomes: impl IntoIterator<Item = OutcomeRecord>) -> Result<()> {
        let mut wrote_any = false;
        for outcome in outcomes {
            self.writer.serialize(outcome)?;
            wrote_any = true;
        }
        if !wrote_any {
            self.writer.write_record(["party", "objective", "outcome"])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::simulation::OutcomeKind;

    fn written(outcomes: Vec<OutcomeRecord>) -> String {
        let mut out = Vec::new();
        OutcomeWriter::new(&mut out).write_outcomes(outcomes).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_rows_follow_header() {
        let text = written(vec![
            OutcomeRecord {
                party: "alice".into(),
                objective: "DirectFunding-0x01".into(),
                outcome: OutcomeKind::Completed,
            },
            OutcomeRecord {
                party: "bob".into(),
                objective: "0x02".into(),
                outcome: OutcomeKind::Voucher,
            },
        ]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "party,objective,outcome");
        assert_eq!(lines[1], "alice,DirectFunding-0x01,completed");
        assert_eq!(lines[2], "bob,0x02,voucher");
    }

    #[test]
    fn test_empty_still_has_header() {
        assert_eq!(written(Vec::new()), "party,objective,outcome\n");
    }
}
