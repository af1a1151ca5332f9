//! Disposable request identities.
//!
//! Every quote request goes out with a synthetic person (name, email, phone)
//! and a user agent drawn from a fixed pool. Emails are unique for the
//! lifetime of the generator. Usernames come from one of several styles
//! chosen uniformly per call so consecutive requests do not share a shape.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::model::Identity;

/// Proposals tried before falling back to [`widened_email`].
const MAX_EMAIL_ATTEMPTS: usize = 16;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/119.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/119.0.0.0 Safari/537.36",
];

const FIRST_NAMES: &[&str] = &[
    "James", "Mary", "Robert", "Patricia", "John", "Jennifer", "Michael", "Linda", "David",
    "Elizabeth", "William", "Barbara", "Richard", "Susan", "Joseph", "Jessica", "Thomas", "Sarah",
    "Charles", "Karen", "Daniel", "Lisa", "Matthew", "Nancy", "Anthony", "Betty", "Mark",
    "Sandra", "Steven", "Ashley", "Andrew", "Emily", "Joshua", "Michelle", "Kevin", "Amanda",
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis", "Rodriguez",
    "Martinez", "Hernandez", "Lopez", "Gonzalez", "Wilson", "Anderson", "Thomas", "Taylor",
    "Moore", "Jackson", "Martin", "Lee", "Perez", "Thompson", "White", "Harris", "Sanchez",
    "Clark", "Ramirez", "Lewis", "Robinson", "Walker", "Young", "Allen", "King", "Wright",
];

const WORDS: &[&str] = &[
    "river", "maple", "stone", "cloud", "harbor", "meadow", "falcon", "cedar", "ember", "summit",
    "willow", "canyon", "breeze", "copper", "lantern", "orchard", "prairie", "timber", "garnet",
    "thunder", "valley", "birch", "coral", "aspen", "delta", "fern", "granite", "juniper",
];

const AREA_CODES: &[&str] = &[
    "201", "202", "203", "205", "206", "207", "208", "209", "210", "212", "213", "214", "215",
    "216", "217", "218", "219", "224", "225", "228", "229", "231", "234", "239", "240", "248",
    "251", "252", "253", "254", "256", "260", "262", "267", "269", "270", "276", "281", "301",
    "302", "303", "304", "305", "307", "308", "309", "310", "312", "313", "314", "315", "316",
    "317", "318", "319", "320", "321", "323", "325", "330", "331", "334", "336", "337", "339",
    "346", "347", "351", "352", "360", "361", "385", "386", "401", "402", "404", "405", "406",
    "407", "408", "409", "410", "412", "413", "414", "415", "417", "419", "423", "424", "425",
    "430", "432", "434", "435", "440", "442", "443", "469", "470", "475", "478", "479", "480",
    "484", "501", "502", "503", "504", "505", "507", "508", "509", "510", "512", "513", "515",
    "516", "517", "518", "520", "530", "531", "534", "539", "540", "541", "551", "559", "561",
    "562", "563", "567", "570", "571", "573", "574", "575", "580", "585", "586", "601", "602",
    "603", "605", "606", "607", "608", "609", "610", "612", "614", "615", "616", "617", "618",
    "619", "620", "623", "626", "630", "631", "636", "641", "646", "650", "651", "657", "660",
    "661", "662", "667", "678", "681", "682", "701", "702", "703", "704", "706", "707", "708",
    "712", "713", "714", "715", "716", "717", "718", "719", "720", "724", "726", "727", "731",
    "732", "734", "737", "740", "747", "754", "757", "760", "762", "763", "765", "769", "770",
    "772", "773", "774", "775", "779", "781", "785", "786", "801", "802", "803", "804", "805",
    "806", "808", "810", "812", "813", "814", "815", "816", "817", "818", "828", "830", "831",
    "832", "843", "845", "847", "848", "850", "856", "857", "858", "859", "860", "862", "863",
    "864", "865", "870", "872", "878", "901", "903", "904", "906", "907", "908", "909", "910",
    "912", "913", "914", "915", "916", "917", "918", "919", "920", "925", "928", "929", "931",
    "936", "937", "938", "940", "941", "947", "949", "951", "952", "954", "956", "970", "971",
    "972", "973", "978", "979", "980", "984", "985", "986", "989",
];

const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Source of synthetic identities for outgoing requests.
pub trait IdentitySource: Send {
    fn next_user_agent(&mut self) -> String;
    fn next_identity(&mut self) -> Identity;
}

// ---------------------------------------------------------------------------
// Username styles
// ---------------------------------------------------------------------------

/// Interchangeable ways of building the local part of an email address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsernameStyle {
    /// `jsmith482`, `mary.lopez913`
    Handle,
    /// `jamesbrown42`
    FullNameDigits,
    /// `k3v9q0x1za`
    Alphanumeric,
    /// `rivermaple731`
    WordPair,
}

impl UsernameStyle {
    pub const ALL: [UsernameStyle; 4] = [
        UsernameStyle::Handle,
        UsernameStyle::FullNameDigits,
        UsernameStyle::Alphanumeric,
        UsernameStyle::WordPair,
    ];

    pub fn random<R: Rng>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }

    pub fn generate<R: Rng>(self, rng: &mut R) -> String {
        match self {
            UsernameStyle::Handle => {
                let first = pick(rng, FIRST_NAMES).to_lowercase();
                let last = pick(rng, LAST_NAMES).to_lowercase();
                let handle = match rng.gen_range(0..3) {
                    0 => format!("{}{last}", &first[..1]),
                    1 => format!("{first}.{last}"),
                    _ => format!("{first}_{}", &last[..1]),
                };
                format!("{handle}{}", rng.gen_range(100..=999))
            }
            UsernameStyle::FullNameDigits => format!(
                "{}{}{}",
                pick(rng, FIRST_NAMES).to_lowercase(),
                pick(rng, LAST_NAMES).to_lowercase(),
                rng.gen_range(10..=99)
            ),
            UsernameStyle::Alphanumeric => random_alphanumeric(rng, 10),
            UsernameStyle::WordPair => format!(
                "{}{}{}",
                pick(rng, WORDS),
                pick(rng, WORDS),
                rng.gen_range(100..=999)
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Domains
// ---------------------------------------------------------------------------

/// Email provider family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainFamily {
    Gmail,
    Yahoo,
    Hotmail,
    Icloud,
    Proton,
    Random,
}

impl DomainFamily {
    /// Families drawn from when building request emails.
    const REQUEST_MIX: [DomainFamily; 4] = [
        DomainFamily::Gmail,
        DomainFamily::Yahoo,
        DomainFamily::Hotmail,
        DomainFamily::Random,
    ];

    pub fn domains(self) -> &'static [&'static str] {
        match self {
            DomainFamily::Gmail => &["gmail.com", "googlemail.com"],
            DomainFamily::Yahoo => &["yahoo.com", "yahoo.co.uk", "ymail.com"],
            DomainFamily::Hotmail => &["hotmail.com", "outlook.com", "live.com"],
            DomainFamily::Icloud => &["icloud.com", "me.com"],
            DomainFamily::Proton => &["protonmail.com", "proton.me"],
            DomainFamily::Random => &[
                "gmail.com",
                "yahoo.com",
                "hotmail.com",
                "outlook.com",
                "icloud.com",
            ],
        }
    }
}

fn pick<'a, R: Rng>(rng: &mut R, pool: &[&'a str]) -> &'a str {
    pool.choose(rng).copied().unwrap_or_default()
}

fn random_alphanumeric<R: Rng>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| ALPHANUMERIC[rng.gen_range(0..ALPHANUMERIC.len())] as char)
        .collect()
}

/// Email built from a random style and a random provider.
pub fn propose_email<R: Rng>(rng: &mut R) -> String {
    let family = DomainFamily::REQUEST_MIX[rng.gen_range(0..DomainFamily::REQUEST_MIX.len())];
    let domain = pick(rng, family.domains());
    format!("{}@{domain}", UsernameStyle::random(rng).generate(rng))
}

/// Long random local part plus a caller-supplied sequence number.
fn widened_email<R: Rng>(rng: &mut R, seq: u64) -> String {
    let domain = pick(rng, DomainFamily::Random.domains());
    format!("{}{seq}@{domain}", random_alphanumeric(rng, 16))
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Random identity generator with process-lifetime email uniqueness.
pub struct IdentityGenerator {
    rng: StdRng,
    issued_emails: HashSet<String>,
    fallback_seq: u64,
}

impl IdentityGenerator {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic generator for tests.
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng,
            issued_emails: HashSet::new(),
            fallback_seq: 0,
        }
    }

    /// Number of distinct emails handed out so far.
    pub fn issued_count(&self) -> usize {
        self.issued_emails.len()
    }

    pub fn next_email(&mut self) -> String {
        self.unique_email_with(propose_email)
    }

    /// Draw emails from `propose` until one has not been issued before.
    ///
    /// After `MAX_EMAIL_ATTEMPTS` collisions the proposer is abandoned for a
    /// 16-character random local part suffixed with a counter. The counter
    /// only grows and the issued set is finite, so the fallback loop ends.
    pub fn unique_email_with<F>(&mut self, mut propose: F) -> String
    where
        F: FnMut(&mut StdRng) -> String,
    {
        for attempt in 1..=MAX_EMAIL_ATTEMPTS {
            let email = propose(&mut self.rng);
            if self.issued_emails.insert(email.clone()) {
                return email;
            }
            debug!(attempt, "email collision, regenerating");
        }

        loop {
            self.fallback_seq += 1;
            let email = widened_email(&mut self.rng, self.fallback_seq);
            if self.issued_emails.insert(email.clone()) {
                return email;
            }
        }
    }

    pub fn next_name(&mut self) -> String {
        format!(
            "{} {}",
            pick(&mut self.rng, FIRST_NAMES),
            pick(&mut self.rng, LAST_NAMES)
        )
    }

    /// US number formatted `(AAA) PPP-LLLL`.
    pub fn next_phone(&mut self) -> String {
        let area = pick(&mut self.rng, AREA_CODES);
        let prefix = self.rng.gen_range(200..=999);
        let line = self.rng.gen_range(1000..=9999);
        format!("({area}) {prefix}-{line}")
    }
}

impl Default for IdentityGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentitySource for IdentityGenerator {
    fn next_user_agent(&mut self) -> String {
        pick(&mut self.rng, USER_AGENTS).to_string()
    }

    fn next_identity(&mut self) -> Identity {
        Identity {
            name: self.next_name(),
            email: self.next_email(),
            phone: self.next_phone(),
        }
    }
}
