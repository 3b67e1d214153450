//! Fixed language slot table for the archive's packed bit-sets
//!
//! Depot languages are recorded as a 128-bit set over this table. Slot
//! assignments are part of the on-disk format and must never be reordered;
//! new languages may only be appended to free slots. Slot 0 is the `"*"`
//! wildcard. Unknown tags set no bit; the raw manifest JSON inside the
//! archive stays authoritative.

/// Slot assignments of the 128-slot language table
///
/// Bare ISO 639-1 codes and regioned tags occupy distinct slots because
/// depot manifests use both spellings.
pub const LANGUAGE_SLOTS: &[&str] = &[
    "*",       // 0
    "en-US",   // 1
    "en-GB",   // 2
    "de-DE",   // 3
    "fr-FR",   // 4
    "es-ES",   // 5
    "es-MX",   // 6
    "it-IT",   // 7
    "pt-BR",   // 8
    "pt-PT",   // 9
    "ru-RU",   // 10
    "pl-PL",   // 11
    "zh-Hans", // 12
    "zh-Hant", // 13
    "ja-JP",   // 14
    "ko-KR",   // 15
    "cs-CZ",   // 16
    "hu-HU",   // 17
    "tr-TR",   // 18
    "nl-NL",   // 19
    "sv-SE",   // 20
    "nb-NO",   // 21
    "da-DK",   // 22
    "fi-FI",   // 23
    "uk-UA",   // 24
    "ar-SA",   // 25
    "ro-RO",   // 26
    "bg-BG",   // 27
    "el-GR",   // 28
    "th-TH",   // 29
    "vi-VN",   // 30
    "id-ID",   // 31
    "en",      // 32
    "de",      // 33
    "fr",      // 34
    "es",      // 35
    "it",      // 36
    "pt",      // 37
    "ru",      // 38
    "pl",      // 39
    "zh",      // 40
    "ja",      // 41
    "ko",      // 42
    "cs",      // 43
    "hu",      // 44
    "tr",      // 45
    "nl",      // 46
    "sv",      // 47
    "no",      // 48
    "da",      // 49
    "fi",      // 50
    "uk",      // 51
    "ar",      // 52
    "ro",      // 53
    "br",      // 54
    "cn",      // 55
    "gog_sl",  // 56
    "he-IL",   // 57
    "sk-SK",   // 58
    "sr-RS",   // 59
    "ca-ES",   // 60
    "et-EE",   // 61
    "lv-LV",   // 62
    "lt-LT",   // 63
];

/// Pack language tags into the two bit-set words
///
/// Matching is case-insensitive; tags outside the table are dropped.
pub fn pack_languages<S: AsRef<str>>(languages: &[S]) -> (u64, u64) {
    let mut low = 0u64;
    let mut high = 0u64;
    for language in languages {
        let language = language.as_ref();
        if let Some(slot) = LANGUAGE_SLOTS
            .iter()
            .position(|s| s.eq_ignore_ascii_case(language))
        {
            if slot < 64 {
                low |= 1 << slot;
            } else {
                high |= 1 << (slot - 64);
            }
        }
    }
    (low, high)
}

/// Expand the two bit-set words back into language tags
pub fn unpack_languages(low: u64, high: u64) -> Vec<&'static str> {
    let mut languages = Vec::new();
    for (slot, name) in LANGUAGE_SLOTS.iter().enumerate() {
        let set = if slot < 64 {
            low & (1 << slot) != 0
        } else {
            high & (1 << (slot - 64)) != 0
        };
        if set {
            languages.push(*name);
        }
    }
    languages
}
