//! Confirmation keyword matcher — pure, locale-specific (Indonesian).
//!
//! Case-insensitive substring matching over small curated word lists. Short
//! single words are matched on word boundaries so "ya" does not fire inside
//! "saya"; multi-word phrases are matched with plain `contains`.

use std::sync::LazyLock;

use regex::Regex;

/// Classification of a medication-confirmation reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationKeyword {
    /// Patient took the medication ("sudah").
    Done,
    /// Patient has not taken it yet ("belum").
    NotYet,
    /// Neither list matched.
    Invalid,
}

/// Classification of a verification reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationKeyword {
    /// Stop everything — stronger than decline.
    Unsubscribe,
    Accept,
    Decline,
    Other,
}

/// Structured poll option for medication confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollConfirmation {
    Done,
    NotYet,
    NeedHelp,
}

fn word_regexes(words: &[&str]) -> Vec<Regex> {
    words
        .iter()
        .map(|w| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(w))).unwrap())
        .collect()
}

static DONE_WORDS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| word_regexes(&["sudah", "sdh", "udah", "telah"]));

static NOT_YET_WORDS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| word_regexes(&["belum", "blm", "lupa", "nanti"]));

static UNSUBSCRIBE_WORDS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| word_regexes(&["berhenti", "stop", "unsubscribe", "keluar"]));

static ACCEPT_WORDS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| word_regexes(&["ya", "iya", "setuju", "ok", "oke", "boleh", "bersedia", "mau"]));

static DECLINE_WORDS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    word_regexes(&["tidak", "tdk", "ga", "gak", "nggak", "enggak", "tolak", "menolak"])
});

fn any_match(regexes: &[Regex], text: &str) -> bool {
    regexes.iter().any(|r| r.is_match(text))
}

/// Classify a free-text reply to a medication reminder.
///
/// "Belum" is checked before "sudah": negative replies commonly quote the
/// prompt ("belum minum obat yang sudah disiapkan") and must stay NotYet.
pub fn match_confirmation(text: &str) -> ConfirmationKeyword {
    if any_match(&NOT_YET_WORDS, text) {
        return ConfirmationKeyword::NotYet;
    }
    if any_match(&DONE_WORDS, text) {
        return ConfirmationKeyword::Done;
    }
    ConfirmationKeyword::Invalid
}

/// Classify a free-text reply to a verification prompt.
///
/// Precedence is a deliberate tie-break: unsubscribe > accept > decline.
/// "ya tapi saya mau berhenti" is an unsubscribe, not an accept.
pub fn match_verification(text: &str) -> VerificationKeyword {
    if any_match(&UNSUBSCRIBE_WORDS, text) {
        return VerificationKeyword::Unsubscribe;
    }
    if any_match(&ACCEPT_WORDS, text) {
        return VerificationKeyword::Accept;
    }
    if any_match(&DECLINE_WORDS, text) {
        return VerificationKeyword::Decline;
    }
    VerificationKeyword::Other
}

/// Map a verification poll option ("Ya"/"Tidak") to a verification keyword.
pub fn match_verification_poll(option: &str) -> Option<VerificationKeyword> {
    match option.trim().to_lowercase().as_str() {
        "ya" => Some(VerificationKeyword::Accept),
        "tidak" => Some(VerificationKeyword::Decline),
        _ => None,
    }
}

/// Map a confirmation poll option ("Sudah"/"Belum"/"Butuh Bantuan").
pub fn match_confirmation_poll(option: &str) -> Option<PollConfirmation> {
    match option.trim().to_lowercase().as_str() {
        "sudah" => Some(PollConfirmation::Done),
        "belum" => Some(PollConfirmation::NotYet),
        "butuh bantuan" => Some(PollConfirmation::NeedHelp),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sudah_variants_are_done() {
        assert_eq!(match_confirmation("sudah"), ConfirmationKeyword::Done);
        assert_eq!(match_confirmation("SUDAH"), ConfirmationKeyword::Done);
        assert_eq!(
            match_confirmation("sudah minum obatnya tadi pagi"),
            ConfirmationKeyword::Done
        );
        assert_eq!(match_confirmation("sdh bu"), ConfirmationKeyword::Done);
    }

    #[test]
    fn belum_variants_are_not_yet() {
        assert_eq!(match_confirmation("belum"), ConfirmationKeyword::NotYet);
        assert_eq!(
            match_confirmation("belum minum obatnya"),
            ConfirmationKeyword::NotYet
        );
        assert_eq!(match_confirmation("blm, nanti ya"), ConfirmationKeyword::NotYet);
    }

    #[test]
    fn belum_wins_when_both_present() {
        assert_eq!(
            match_confirmation("belum minum obat yang sudah disiapkan"),
            ConfirmationKeyword::NotYet
        );
    }

    #[test]
    fn unrelated_text_is_invalid() {
        assert_eq!(
            match_confirmation("obatnya habis, minta tolong"),
            ConfirmationKeyword::Invalid
        );
        assert_eq!(match_confirmation(""), ConfirmationKeyword::Invalid);
    }

    #[test]
    fn accept_words() {
        assert_eq!(match_verification("Ya"), VerificationKeyword::Accept);
        assert_eq!(
            match_verification("iya saya setuju"),
            VerificationKeyword::Accept
        );
        assert_eq!(match_verification("oke boleh"), VerificationKeyword::Accept);
    }

    #[test]
    fn decline_words() {
        assert_eq!(match_verification("tidak"), VerificationKeyword::Decline);
        assert_eq!(
            match_verification("maaf saya menolak"),
            VerificationKeyword::Decline
        );
    }

    #[test]
    fn unsubscribe_beats_accept() {
        assert_eq!(
            match_verification("ya tapi saya mau berhenti"),
            VerificationKeyword::Unsubscribe
        );
        assert_eq!(
            match_verification("STOP kirim pesan"),
            VerificationKeyword::Unsubscribe
        );
    }

    #[test]
    fn accept_beats_decline() {
        // Contains both "ya" and "tidak" — accept is checked first.
        assert_eq!(
            match_verification("ya, tidak masalah"),
            VerificationKeyword::Accept
        );
    }

    #[test]
    fn ya_does_not_fire_inside_saya() {
        assert_eq!(
            match_verification("saya kurang paham"),
            VerificationKeyword::Other
        );
    }

    #[test]
    fn free_text_is_other() {
        assert_eq!(
            match_verification("siapa ini?"),
            VerificationKeyword::Other
        );
    }

    #[test]
    fn verification_poll_options() {
        assert_eq!(
            match_verification_poll("Ya"),
            Some(VerificationKeyword::Accept)
        );
        assert_eq!(
            match_verification_poll(" tidak "),
            Some(VerificationKeyword::Decline)
        );
        assert_eq!(match_verification_poll("mungkin"), None);
    }

    #[test]
    fn confirmation_poll_options() {
        assert_eq!(match_confirmation_poll("Sudah"), Some(PollConfirmation::Done));
        assert_eq!(match_confirmation_poll("Belum"), Some(PollConfirmation::NotYet));
        assert_eq!(
            match_confirmation_poll("Butuh Bantuan"),
            Some(PollConfirmation::NeedHelp)
        );
        assert_eq!(match_confirmation_poll("lainnya"), None);
    }
}
