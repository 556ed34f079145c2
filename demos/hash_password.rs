use std::env;

use anyhow::Context;

use repository::auth::password::hash_password;

fn main() -> anyhow::Result<()> {
    let password = env::args()
        .nth(1)
        .context("Usage: cargo run --example hash_password <password>")?;
    println!("{}", hash_password(&password)?);
    Ok(())
}
