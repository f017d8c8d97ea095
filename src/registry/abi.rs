//! Minimal ABI helpers for the agent registry contract
//!
//! Only what the registry client needs: calldata for
//! `registerAgent(string)`, the `AgentRegistered` topic, and decoding of
//! 32-byte words and JSON-RPC hex quantities.

/// First four bytes of keccak256("registerAgent(string)")
pub const REGISTER_AGENT_SELECTOR: [u8; 4] = [0x2d, 0x2a, 0x95, 0x85];

/// keccak256("AgentRegistered(uint256,address,string)")
pub const AGENT_REGISTERED_TOPIC: &str =
    "0x0d063c6022bff16d09991a9f91882ffa112f5fb2529136f65eb4c77bbd047e43";

const WORD: usize = 32;

fn word_from_u64(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&value.to_be_bytes());
    word
}

/// `0x`-prefixed calldata for `registerAgent(cid)`
pub fn encode_register_agent(cid: &str) -> String {
    let bytes = cid.as_bytes();
    let padded_len = bytes.len().div_ceil(WORD) * WORD;

    let mut data = Vec::with_capacity(4 + 2 * WORD + padded_len);
    data.extend_from_slice(&REGISTER_AGENT_SELECTOR);
    // head: offset of the dynamic string argument
    data.extend_from_slice(&word_from_u64(WORD as u64));
    // tail: length, then right-padded bytes
    data.extend_from_slice(&word_from_u64(bytes.len() as u64));
    data.extend_from_slice(bytes);
    data.resize(4 + 2 * WORD + padded_len, 0);

    format!("0x{}", hex::encode(data))
}

/// Decode a 32-byte big-endian word (hex, `0x` optional) that must fit in a u64
pub fn decode_u64_word(word: &str) -> Option<u64> {
    let digits = word.strip_prefix("0x").unwrap_or(word);
    if digits.is_empty() || digits.len() > 2 * WORD || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    let significant = digits.trim_start_matches('0');
    if significant.len() > 16 {
        return None;
    }
    if significant.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(significant, 16).ok()
}

/// First 32-byte word of ABI-encoded log data
pub fn first_data_word(data: &str) -> Option<&str> {
    let digits = data.strip_prefix("0x").unwrap_or(data);
    digits.get(..2 * WORD)
}

/// Parse a JSON-RPC quantity such as `"0x1b4"`
pub fn parse_quantity(quantity: &str) -> Option<u64> {
    let digits = quantity.strip_prefix("0x")?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}
