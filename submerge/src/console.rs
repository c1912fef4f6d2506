use submerge_net::NodeID;

/// One parsed console request: `moneyTransfer`, `failProcess`, `fixProcess`,
/// `printBlockchain`, `printBalance`. `exit` is handled by the binary's read
/// loop directly, since it never reaches the Node Controller at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCmd {
    MoneyTransfer { dst: NodeID, amount: u64 },
    FailProcess,
    FixProcess,
    PrintBlockchain,
    PrintBalance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(pub String);

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParseError {}

/// Tokenizes one line of console input. This is the entire parser: the job
/// here is only to give the shipped binary something to call, not to be a
/// feature in its own right — no quoting, no flags, just whitespace-
/// separated tokens.
pub fn parse_line(line: &str) -> Result<ConsoleCmd, ParseError> {
    let mut tokens = line.split_whitespace();
    let cmd = tokens.next().ok_or_else(|| ParseError("empty command".to_owned()))?;
    match cmd {
        "moneyTransfer" => {
            let dst = tokens
                .next()
                .ok_or_else(|| ParseError("usage: moneyTransfer <dst> <amount>".to_owned()))?;
            let amount = tokens
                .next()
                .ok_or_else(|| ParseError("usage: moneyTransfer <dst> <amount>".to_owned()))?;
            if tokens.next().is_some() {
                return Err(ParseError("moneyTransfer takes exactly two arguments".to_owned()));
            }
            let dst: i64 = dst.parse().map_err(|_| ParseError(format!("not a node id: {dst}")))?;
            let amount: u64 = amount
                .parse()
                .map_err(|_| ParseError(format!("not an amount: {amount}")))?;
            Ok(ConsoleCmd::MoneyTransfer { dst: NodeID(dst), amount })
        }
        "failProcess" => Ok(ConsoleCmd::FailProcess),
        "fixProcess" => Ok(ConsoleCmd::FixProcess),
        "printBlockchain" => Ok(ConsoleCmd::PrintBlockchain),
        "printBalance" => Ok(ConsoleCmd::PrintBalance),
        other => Err(ParseError(format!("unknown command: {other}"))),
    }
}
