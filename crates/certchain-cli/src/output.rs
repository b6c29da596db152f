//! Output formatting utilities.

use certchain_core::MiningReport;
use certchain_types::{Address, TransactionReceipt};
use colored::Colorize;

/// Format address (short version).
pub fn format_address_short(addr: &Address) -> String {
    let s = addr.to_string();
    format!("{}...{}", &s[..10], &s[s.len() - 8..])
}

/// Format wei to human readable.
pub fn format_wei(wei: u128) -> String {
    if wei >= 1_000_000_000_000_000_000 {
        format!("{:.4} ETH", wei as f64 / 1_000_000_000_000_000_000.0)
    } else if wei >= 1_000_000_000 {
        format!("{:.2} Gwei", wei as f64 / 1_000_000_000.0)
    } else {
        format!("{} wei", wei)
    }
}

/// Print success message.
pub fn print_success(msg: &str) {
    println!("{}", format!("✓ {}", msg).green());
}

/// Print error message.
pub fn print_error(msg: &str) {
    eprintln!("{}", format!("✗ {}", msg).red());
}

/// Print warning message.
pub fn print_warning(msg: &str) {
    println!("{}", format!("⚠ {}", msg).yellow());
}

/// Print info message.
pub fn print_info(msg: &str) {
    println!("{}", format!("ℹ {}", msg).blue());
}

/// Print transaction receipt.
pub fn print_receipt(receipt: &TransactionReceipt) {
    println!("{}", "Transaction Receipt".bold());
    println!("{}", "=".repeat(50));
    println!(
        "Transaction Hash: {}",
        receipt.transaction_hash.to_string().bright_cyan()
    );
    println!(
        "Block Number:     {}",
        receipt.block_number.to_string().bright_green()
    );
    println!("From:             {}", receipt.from);
    if let Some(to) = receipt.to {
        println!("To:               {}", to);
    }
    if let Some(address) = receipt.contract_address {
        println!("Contract:         {}", address.to_string().bright_cyan());
    }
    let status = match receipt.status {
        Some(1) => "Success".green(),
        Some(_) => "Reverted".red(),
        None => "Unknown".yellow(),
    };
    println!("Status:           {}", status);
    println!(
        "Gas Used:         {}",
        receipt.gas_used.to_string().bright_yellow()
    );
}

/// Node status as shown by `certchain status`.
pub struct NodeStatus {
    pub rpc_url: String,
    pub block_number: u64,
    pub gas_price: u128,
    pub mining: bool,
    pub pending: u64,
    pub accounts: Vec<Address>,
}

pub fn print_node_status(status: &NodeStatus) {
    println!("{}", "Node Status".bold());
    println!("{}", "=".repeat(50));
    println!("RPC:           {}", status.rpc_url);
    println!("Block Number:  {}", status.block_number.to_string().bright_cyan());
    println!("Gas Price:     {}", format_wei(status.gas_price).bright_yellow());
    let mining = if status.mining {
        "yes".green()
    } else {
        "no".normal()
    };
    println!("Mining:        {}", mining);
    println!("Pending Txs:   {}", status.pending.to_string().bright_magenta());
    println!("Accounts:      {}", status.accounts.len());
    for (index, account) in status.accounts.iter().enumerate() {
        println!("  [{}] {}", index, account);
    }
}

pub fn print_mining_report(report: &MiningReport) {
    println!("{}", "Mining Controller".bold());
    println!("{}", "=".repeat(50));
    println!("Events:        {}", report.events);
    println!("Evaluations:   {}", report.evaluations);
    if report.failed_evaluations > 0 {
        println!(
            "Failed:        {}",
            report.failed_evaluations.to_string().red()
        );
    }
    println!("Starts:        {}", report.starts.to_string().green());
    println!("Stops:         {}", report.stops.to_string().yellow());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_wei() {
        assert_eq!(format_wei(21_000), "21000 wei");
        assert_eq!(format_wei(1_000_000_000), "1.00 Gwei");
        assert_eq!(format_wei(2_500_000_000_000_000_000), "2.5000 ETH");
    }

    #[test]
    fn test_format_address_short() {
        let addr = Address::from_bytes([0xab; 20]);
        assert_eq!(format_address_short(&addr), "0xabababab...abababab");
    }
}
