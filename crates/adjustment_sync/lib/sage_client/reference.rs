/// Translates the free-text reason recorded on an adjustment into HyperSage's short code.
///
/// Unknown reasons pass through unchanged.
pub fn map_reference(reference: &str) -> &str {
    match reference {
        "CFA" | "Cutting" => "C",
        "Measurement" => "M",
        "Sampling" => "S",
        "Adjustments" => "ADJ",
        other => other,
    }
}
