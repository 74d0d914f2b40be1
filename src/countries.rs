/// ISO 3166-1 alpha-2 codes, sorted.
const ISO_3166_ALPHA2: &[&str] = &[
    "AD", "AE", "AF", "AG", "AI", "AL", "AM", "AO", "AQ", "AR", "AS", "AT", "AU", "AW", "AX", "AZ",
    "BA", "BB", "BD", "BE", "BF", "BG", "BH", "BI", "BJ", "BL", "BM", "BN", "BO", "BQ", "BR", "BS",
    "BT", "BV", "BW", "BY", "BZ", "CA", "CC", "CD", "CF", "CG", "CH", "CI", "CK", "CL", "CM", "CN",
    "CO", "CR", "CU", "CV", "CW", "CX", "CY", "CZ", "DE", "DJ", "DK", "DM", "DO", "DZ", "EC", "EE",
    "EG", "EH", "ER", "ES", "ET", "FI", "FJ", "FK", "FM", "FO", "FR", "GA", "GB", "GD", "GE", "GF",
    "GG", "GH", "GI", "GL", "GM", "GN", "GP", "GQ", "GR", "GS", "GT", "GU", "GW", "GY", "HK", "HM",
    "HN", "HR", "HT", "HU", "ID", "IE", "IL", "IM", "IN", "IO", "IQ", "IR", "IS", "IT", "JE", "JM",
    "JO", "JP", "KE", "KG", "KH", "KI", "KM", "KN", "KP", "KR", "KW", "KY", "KZ", "LA", "LB", "LC",
    "LI", "LK", "LR", "LS", "LT", "LU", "LV", "LY", "MA", "MC", "MD", "ME", "MF", "MG", "MH", "MK",
    "ML", "MM", "MN", "MO", "MP", "MQ", "MR", "MS", "MT", "MU", "MV", "MW", "MX", "MY", "MZ", "NA",
    "NC", "NE", "NF", "NG", "NI", "NL", "NO", "NP", "NR", "NU", "NZ", "OM", "PA", "PE", "PF", "PG",
    "PH", "PK", "PL", "PM", "PN", "PR", "PS", "PT", "PW", "PY", "QA", "RE", "RO", "RS", "RU", "RW",
    "SA", "SB", "SC", "SD", "SE", "SG", "SH", "SI", "SJ", "SK", "SL", "SM", "SN", "SO", "SR", "SS",
    "ST", "SV", "SX", "SY", "SZ", "TC", "TD", "TF", "TG", "TH", "TJ", "TK", "TL", "TM", "TN", "TO",
    "TR", "TT", "TV", "TW", "TZ", "UA", "UG", "UM", "US", "UY", "UZ", "VA", "VC", "VE", "VG", "VI",
    "VN", "VU", "WF", "WS", "YE", "YT", "ZA", "ZM", "ZW",
];

/// Codes the listing API uses outside ISO 3166 (unknown, Kosovo, and a few
/// organisation-specific territories).
const NON_STANDARD: &[&str] = &["UNK", "XK", "914", "916", "922"];

/// Every nationality value the partitioner probes, in sweep order: the ISO
/// codes alphabetically, then the non-standard ones as listed.
pub fn nationality_codes() -> Vec<String> {
    ISO_3166_ALPHA2
        .iter()
        .chain(NON_STANDARD)
        .map(|c| c.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_standard_and_extra_codes() {
        let codes = nationality_codes();
        assert_eq!(codes.len(), ISO_3166_ALPHA2.len() + NON_STANDARD.len());
        assert!(codes.iter().any(|c| c == "FR"));
        assert!(codes.iter().any(|c| c == "XK"));
        assert!(codes.iter().any(|c| c == "UNK"));
    }

    #[test]
    fn iso_codes_sorted_then_non_standard_last() {
        let codes = nationality_codes();
        let (iso, rest) = codes.split_at(ISO_3166_ALPHA2.len());

        let mut sorted = iso.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(iso, sorted.as_slice());
        assert_eq!(iso.first().map(String::as_str), Some("AD"));
        assert_eq!(rest, ["UNK", "XK", "914", "916", "922"]);
    }
}
