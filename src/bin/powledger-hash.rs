#![forbid(unsafe_code)]
//! Print the ledger's mixing hash for each argument, or for stdin when no
//! arguments are given.

use powledger::crypto::{hash_hex, mix_hash};
use std::env;
use std::io::{self, Read};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().skip(1).collect();

    if args.is_empty() {
        let mut input = Vec::new();
        io::stdin().read_to_end(&mut input)?;
        println!("{}", hex::encode(mix_hash(&input)));
        return Ok(());
    }

    for arg in &args {
        println!("{}  {}", hash_hex(arg), arg);
    }
    Ok(())
}
