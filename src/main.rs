fn main() {
    println!("Kalah Arena - networked Kalah arbiter");
    println!();
    println!("Usage:");
    println!("  Start the server:    cargo run --bin server");
    println!("  Register a player:   cargo run --bin runner -- --register NAME PW");
    println!("  Run a player:        cargo run --bin runner -- --user NAME PW --program ./my-bot");
    println!();
    println!("The server listens on port 31337 and keeps user records in users.ron.");
    println!("Player programs read moves on stdin and write their own to stdout.");
}
