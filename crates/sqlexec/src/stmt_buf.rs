use std::collections::VecDeque;
use std::pin::pin;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::commands::{CmdPos, Command};
use crate::errors::{ExecError, Result, internal};

#[derive(Debug)]
struct StmtBufState {
    /// Retained commands. The first command is at `start_pos`.
    data: VecDeque<Command>,
    start_pos: CmdPos,
    /// Position of the command the reader is currently on. May be one past
    /// the last pushed command.
    cur_pos: CmdPos,
    /// Position of the last pushed command, -1 if nothing has been pushed.
    last_pos: CmdPos,
    closed: bool,
}

/// Buffer of commands for a connection executor.
///
/// Any number of producers may push commands. A single reader consumes them
/// through a cursor that is normally advanced one command at a time, but may
/// also be rewound to a retained position, or moved forward to the next
/// sync.
///
/// Positions in `[start_pos, last_pos]` are retained until explicitly
/// trimmed with [`StmtBuf::ltrim`].
#[derive(Debug)]
pub struct StmtBuf {
    mu: Mutex<StmtBufState>,
    notify: Notify,
}

impl Default for StmtBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl StmtBuf {
    pub fn new() -> Self {
        StmtBuf {
            mu: Mutex::new(StmtBufState {
                data: VecDeque::new(),
                start_pos: 0,
                cur_pos: 0,
                last_pos: -1,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Append a command, waking up the reader if it's waiting for one.
    pub fn push(&self, cmd: impl Into<Command>) -> Result<()> {
        {
            let mut state = self.mu.lock();
            if state.closed {
                return Err(ExecError::BufferClosed);
            }
            state.data.push_back(cmd.into());
            state.last_pos += 1;
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Get the command at the current cursor position, waiting for it to be
    /// pushed if needed.
    ///
    /// Returns `EndOfInput` once the buffer is closed.
    pub async fn cur_cmd(&self, ctx: &CancellationToken) -> Result<(Command, CmdPos)> {
        loop {
            let mut notified = pin!(self.notify.notified());
            // Register before checking so a push between the check and the
            // wait isn't missed.
            notified.as_mut().enable();

            {
                let state = self.mu.lock();
                if state.closed {
                    return Err(ExecError::EndOfInput);
                }
                let idx = state.cur_pos - state.start_pos;
                if idx < 0 {
                    return Err(internal!(
                        "cursor at {} before start of buffer {}",
                        state.cur_pos,
                        state.start_pos
                    ));
                }
                let idx = idx as usize;
                if idx < state.data.len() {
                    return Ok((state.data[idx].clone(), state.cur_pos));
                }
                if idx > state.data.len() {
                    return Err(internal!(
                        "corrupt cursor: {} past last position {}",
                        state.cur_pos,
                        state.last_pos
                    ));
                }
            }

            tokio::select! {
                _ = ctx.cancelled() => return Err(ExecError::ContextCanceled),
                _ = notified => (),
            }
        }
    }

    /// Move the cursor to the next position, returning the previous one.
    ///
    /// The next command doesn't need to have been pushed yet, but the cursor
    /// never moves more than one past the last pushed command.
    pub fn advance_one(&self) -> CmdPos {
        let mut state = self.mu.lock();
        let prev = state.cur_pos;
        if state.cur_pos <= state.last_pos {
            state.cur_pos += 1;
        }
        prev
    }

    /// Move the cursor forward until it's on the next sync command.
    ///
    /// The cursor must currently be on a pushed command. Waits for commands
    /// to be pushed as needed.
    pub async fn seek_to_next_batch(&self, ctx: &CancellationToken) -> Result<()> {
        {
            let state = self.mu.lock();
            let idx = state.cur_pos - state.start_pos;
            if idx < 0 || idx as usize >= state.data.len() {
                return Err(internal!("invalid seek start point: {}", state.cur_pos));
            }
        }

        loop {
            self.advance_one();
            let (cmd, _) = self.cur_cmd(ctx).await?;
            if cmd.is_sync() {
                return Ok(());
            }
        }
    }

    /// Move the cursor back to `pos`.
    ///
    /// `pos` must still be retained in the buffer.
    pub fn rewind(&self, pos: CmdPos) -> Result<()> {
        let mut state = self.mu.lock();
        if pos < state.start_pos {
            return Err(internal!(
                "attempting to rewind to {pos} before start of buffer {}",
                state.start_pos
            ));
        }
        if pos > state.cur_pos {
            return Err(internal!(
                "attempting to rewind forward from {} to {pos}",
                state.cur_pos
            ));
        }
        state.cur_pos = pos;
        Ok(())
    }

    /// Discard all commands before `pos`.
    pub fn ltrim(&self, pos: CmdPos) -> Result<()> {
        let mut state = self.mu.lock();
        if pos < state.start_pos || pos > state.cur_pos {
            return Err(internal!(
                "invalid ltrim position {pos}, buffer is at [{}, {}]",
                state.start_pos,
                state.cur_pos
            ));
        }
        let n = (pos - state.start_pos) as usize;
        state.data.drain(..n);
        state.start_pos = pos;
        Ok(())
    }

    /// Close the buffer. Pending and future reads return `EndOfInput`.
    pub fn close(&self) {
        self.mu.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.mu.lock().closed
    }

    /// Current cursor position.
    pub fn cursor(&self) -> CmdPos {
        self.mu.lock().cur_pos
    }

    /// Number of retained commands.
    pub fn len(&self) -> usize {
        self.mu.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::commands::{ExecStmt, SyncCmd};

    fn exec(sql: &str) -> Command {
        let stmt = parser::parse_one(sql).unwrap();
        ExecStmt::new(stmt, false).into()
    }

    fn sync() -> Command {
        SyncCmd {
            explicit_from_client: false,
        }
        .into()
    }

    fn sql_of(cmd: &Command) -> String {
        match cmd {
            Command::ExecStmt(cmd) => cmd.stmt.sql.clone(),
            other => other.to_string(),
        }
    }

    #[tokio::test]
    async fn advance_past_end_clamped() {
        let buf = StmtBuf::new();
        let ctx = CancellationToken::new();
        assert_eq!(0, buf.advance_one());
        assert_eq!(0, buf.advance_one());
        assert_eq!(0, buf.cursor());

        buf.push(exec("SELECT 1")).unwrap();
        assert_eq!(0, buf.advance_one());
        buf.advance_one();
        assert_eq!(1, buf.cursor());

        buf.push(exec("SELECT 2")).unwrap();
        let (cmd, pos) = buf.cur_cmd(&ctx).await.unwrap();
        assert_eq!(1, pos);
        assert_eq!("SELECT 2", sql_of(&cmd));
    }

    #[tokio::test]
    async fn fifo_positions() {
        let buf = StmtBuf::new();
        let ctx = CancellationToken::new();
        for i in 0..5 {
            buf.push(exec(&format!("SELECT {i}"))).unwrap();
        }

        for i in 0..5 {
            let (cmd, pos) = buf.cur_cmd(&ctx).await.unwrap();
            assert_eq!(i as CmdPos, pos);
            assert_eq!(format!("SELECT {i}"), sql_of(&cmd));
            assert_eq!(pos, buf.advance_one());
        }
    }

    #[tokio::test]
    async fn push_after_close() {
        let buf = StmtBuf::new();
        buf.push(exec("SELECT 1")).unwrap();
        buf.close();
        buf.close();

        assert!(matches!(
            buf.push(exec("SELECT 2")),
            Err(ExecError::BufferClosed)
        ));
        assert!(matches!(
            buf.cur_cmd(&CancellationToken::new()).await,
            Err(ExecError::EndOfInput)
        ));
    }

    #[tokio::test]
    async fn close_wakes_blocked_reader() {
        let buf = Arc::new(StmtBuf::new());
        let reader = {
            let buf = buf.clone();
            tokio::spawn(async move { buf.cur_cmd(&CancellationToken::new()).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        buf.close();

        let res = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(res, Err(ExecError::EndOfInput)));
    }

    #[tokio::test]
    async fn reader_waits_for_push() {
        let buf = Arc::new(StmtBuf::new());
        let reader = {
            let buf = buf.clone();
            tokio::spawn(async move { buf.cur_cmd(&CancellationToken::new()).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        buf.push(exec("SELECT 1")).unwrap();

        let (cmd, pos) = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(0, pos);
        assert_eq!("SELECT 1", sql_of(&cmd));
    }

    #[tokio::test]
    async fn canceled_while_waiting() {
        let buf = StmtBuf::new();
        let ctx = CancellationToken::new();
        ctx.cancel();
        assert!(matches!(
            buf.cur_cmd(&ctx).await,
            Err(ExecError::ContextCanceled)
        ));
    }

    #[tokio::test]
    async fn seek_rewind_ltrim() {
        let buf = StmtBuf::new();
        let ctx = CancellationToken::new();
        buf.push(exec("SELECT 1")).unwrap();
        buf.push(exec("SELECT 2")).unwrap();
        buf.push(sync()).unwrap();
        buf.push(exec("SELECT 3")).unwrap();

        buf.seek_to_next_batch(&ctx).await.unwrap();
        let (cmd, pos) = buf.cur_cmd(&ctx).await.unwrap();
        assert!(cmd.is_sync());
        assert_eq!(2, pos);

        buf.rewind(1).unwrap();
        assert_eq!(1, buf.cursor());

        buf.ltrim(1).unwrap();
        assert_eq!(3, buf.len());
        buf.rewind(0).unwrap_err();
        buf.ltrim(2).unwrap_err();

        let (cmd, pos) = buf.cur_cmd(&ctx).await.unwrap();
        assert_eq!(1, pos);
        assert_eq!("SELECT 2", sql_of(&cmd));
    }

    #[tokio::test]
    async fn advance_past_end_waits() {
        let buf = Arc::new(StmtBuf::new());
        let ctx = CancellationToken::new();
        buf.push(exec("SELECT 1")).unwrap();
        buf.cur_cmd(&ctx).await.unwrap();
        buf.advance_one();

        let reader = {
            let buf = buf.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { buf.cur_cmd(&ctx).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        ctx.cancel();

        let res = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(res, Err(ExecError::ContextCanceled)));
    }
}
