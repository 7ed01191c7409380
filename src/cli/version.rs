/// Display version information
pub fn execute() {
    println!("ethmatrix {}", env!("CARGO_PKG_VERSION"));
    println!("Matrix chat bridge with Ethereum-signed identities");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_execute() {
        execute();
    }
}
