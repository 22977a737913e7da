use std::io::Write;

use anyhow::Result;
use kvclient::DB;
use parser::StatementReturnType;
use sqlexec::{BatchOutput, ExecutorConfig, Session, SessionData, StatementOutput};
use tracing::debug;

/// A session against an in-process database, printing results as text.
#[derive(Debug)]
pub struct LocalSession {
    session: Session,
}

impl LocalSession {
    pub fn new(config: &ExecutorConfig) -> Self {
        let db = DB::new_local(config.kv.clone());
        let session = Session::new(db, config, SessionData::from_config(config));
        LocalSession { session }
    }

    /// Execute `sql` as a single batch, writing results to `out` and errors
    /// to `err`.
    ///
    /// Returns `false` if any statement failed.
    pub async fn execute<W1: Write, W2: Write>(
        &mut self,
        sql: &str,
        out: &mut W1,
        err: &mut W2,
    ) -> Result<bool> {
        let batch = match self.session.execute(sql).await {
            Ok(batch) => batch,
            Err(e) => {
                writeln!(err, "ERROR: {e}")?;
                return Ok(false);
            }
        };
        debug!(outputs = batch.outputs.len(), status = %batch.txn_status.as_char(), "executed batch");
        write_batch(&batch, out, err)
    }

    pub async fn close(mut self) -> Result<()> {
        self.session.close().await?;
        Ok(())
    }
}

fn write_batch<W1: Write, W2: Write>(batch: &BatchOutput, out: &mut W1, err: &mut W2) -> Result<bool> {
    let mut ok = true;
    for output in &batch.outputs {
        if let Some(e) = &output.error {
            writeln!(err, "ERROR: {e}")?;
            ok = false;
            continue;
        }
        write_output(output, out)?;
    }
    Ok(ok)
}

fn write_output<W: Write>(output: &StatementOutput, out: &mut W) -> Result<()> {
    match output.return_type {
        Some(StatementReturnType::Rows) => {
            let names: Vec<_> = output.columns.iter().map(|c| c.name.as_str()).collect();
            writeln!(out, "{}", names.join("\t"))?;
            for row in &output.rows {
                let vals: Vec<_> = row.iter().map(|d| d.to_string()).collect();
                writeln!(out, "{}", vals.join("\t"))?;
            }
            writeln!(out, "{} {}", output.tag, output.rows.len())?;
        }
        Some(StatementReturnType::RowsAffected) => {
            writeln!(out, "{} {}", output.tag, output.rows_affected)?;
        }
        Some(StatementReturnType::Ack) => writeln!(out, "{}", output.tag)?,
        None => (),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use sqlexec::{DataType, Datum, ResultColumn, TxnStatusIndicator};

    use super::*;

    fn output(tag: &'static str, return_type: StatementReturnType) -> StatementOutput {
        StatementOutput {
            pos: 0,
            tag,
            return_type: Some(return_type),
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: 0,
            error: None,
        }
    }

    #[test]
    fn format_batch() {
        let mut select = output("SELECT", StatementReturnType::Rows);
        select.columns = vec![
            ResultColumn::new("k", DataType::String),
            ResultColumn::new("v", DataType::Int),
        ];
        select.rows = vec![
            vec![Datum::from("a"), Datum::Int(1)],
            vec![Datum::from("b"), Datum::Null],
        ];
        let mut insert = output("INSERT", StatementReturnType::RowsAffected);
        insert.rows_affected = 3;

        let batch = BatchOutput {
            outputs: vec![output("BEGIN", StatementReturnType::Ack), insert, select],
            txn_status: TxnStatusIndicator::InBlock,
        };

        let mut out = Vec::new();
        let mut err = Vec::new();
        assert!(write_batch(&batch, &mut out, &mut err).unwrap());
        assert_eq!(
            "BEGIN\nINSERT 3\nk\tv\na\t1\nb\tNULL\nSELECT 2\n",
            String::from_utf8(out).unwrap()
        );
        assert!(err.is_empty());
    }

    #[test]
    fn errors_written_separately() {
        let mut failed = output("SELECT", StatementReturnType::Rows);
        failed.error = Some(sqlexec::ExecError::QueryExecution("division by zero".to_string()));
        let batch = BatchOutput {
            outputs: vec![failed],
            txn_status: TxnStatusIndicator::Idle,
        };

        let mut out = Vec::new();
        let mut err = Vec::new();
        assert!(!write_batch(&batch, &mut out, &mut err).unwrap());
        assert!(out.is_empty());
        assert_eq!("ERROR: division by zero\n", String::from_utf8(err).unwrap());
    }
}
