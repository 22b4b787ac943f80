use md5;

pub fn md5_from_bytes(input: &[u8]) -> String {
    format!("{:x}", md5::compute(input))
}

pub fn md5_from_str(input: &str) -> String {
    md5_from_bytes(input.as_bytes())
}

pub fn u64_from_bytes(input: &[u8]) -> u64 {
    let digest = md5::compute(input);
    let bytes = digest[0..8].try_into().expect("md5 digest is 16 bytes");
    u64::from_le_bytes(bytes)
}

pub fn u64_from_str(input: &str) -> u64 {
    u64_from_bytes(input.as_bytes())
}
