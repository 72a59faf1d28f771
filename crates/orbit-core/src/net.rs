use tokio::process::Command;

/// Non-loopback IPv4 addresses of this host, in interface order.
///
/// Reads `ip -o -4 addr show` rather than an interface crate so the
/// result matches what the VPN and the compose file will see.
pub async fn get_ip_addresses() -> Vec<String> {
    let output = Command::new("ip")
        .args(["-o", "-4", "addr", "show"])
        .output()
        .await;

    let Ok(output) = output else {
        return Vec::new();
    };
    if !output.status.success() {
        return Vec::new();
    }

    parse_addr_show(&String::from_utf8_lossy(&output.stdout))
}

pub(crate) fn parse_addr_show(stdout: &str) -> Vec<String> {
    let mut addresses = Vec::new();
    for line in stdout.lines() {
        // "2: eth0    inet 10.0.0.5/24 brd ..." -> "10.0.0.5"
        let mut fields = line.split_whitespace();
        let Some(addr) = fields.find(|f| *f == "inet").and_then(|_| fields.next()) else {
            continue;
        };
        let Some(ip) = addr.split('/').next() else {
            continue;
        };
        if ip == "127.0.0.1" || !is_ipv4(ip) {
            continue;
        }
        addresses.push(ip.to_string());
    }
    addresses
}

fn is_ipv4(text: &str) -> bool {
    let octets: Vec<&str> = text.split('.').collect();
    octets.len() == 4 && octets.iter().all(|o| o.parse::<u8>().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_skips_loopback() {
        let stdout = "\
1: lo    inet 127.0.0.1/8 scope host lo\\       valid_lft forever
2: eth0    inet 10.0.0.5/24 brd 10.0.0.255 scope global eth0\\       valid_lft forever
3: wg0    inet 100.64.0.7/32 scope global wg0\\       valid_lft forever
";
        assert_eq!(parse_addr_show(stdout), vec!["10.0.0.5", "100.64.0.7"]);
    }

    #[test]
    fn garbage_lines_are_ignored() {
        assert!(parse_addr_show("not an ip line\ninet\n").is_empty());
        assert!(parse_addr_show("2: eth0 inet not.an.ip.addr/24\n").is_empty());
    }
}
