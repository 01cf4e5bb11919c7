use super::{ProviderError, ProviderKind};
use crate::models::RawCandidate;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

const NAME_PREFIXES: [&str; 10] = [
    "Pro", "Expert", "Quality", "Premium", "Elite", "Local", "Best", "Top", "City", "Metro",
];
const NAME_SUFFIXES: [&str; 8] = [
    "Services", "Solutions", "Pros", "Experts", "Group", "Company", "Team", "Masters",
];
const LEGAL_SUFFIXES: [&str; 7] = ["LLC", "Inc", "Co", "& Sons", "Brothers", "Associates", ""];
const STREET_NAMES: [&str; 12] = [
    "Main", "Oak", "Maple", "Washington", "Park", "Cedar", "Elm", "Pine", "Lake", "Hill",
    "Sunset", "Ocean",
];
const STREET_TYPES: [&str; 8] = ["St", "Ave", "Blvd", "Rd", "Dr", "Ln", "Way", "Ct"];

/// Deterministic synthetic-data provider.
///
/// No external dependency; the terminal fallback of the chain. Every field is
/// drawn from a ChaCha generator seeded with a digest of
/// `(query, location, index)`, so identical inputs always yield identical
/// records.
pub struct SyntheticProvider {
    enabled: bool,
}

impl SyntheticProvider {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_configured(&self) -> bool {
        self.enabled
    }

    pub async fn acquire(
        &self,
        query: &str,
        location: &str,
        cap: usize,
    ) -> Result<Vec<RawCandidate>, ProviderError> {
        if !self.enabled {
            return Err(ProviderError::new(
                ProviderKind::Synthetic,
                "synthetic provider disabled",
            ));
        }

        tracing::info!(
            "[Synthetic] Generating {} sample candidate(s) for: {} in {}",
            cap,
            query,
            location
        );
        Ok(generate(query, location, cap))
    }
}

/// Generates `count` records for the given search.
pub fn generate(query: &str, location: &str, count: usize) -> Vec<RawCandidate> {
    let mut location_parts = location.split(',').map(str::trim);
    let city = location_parts
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("Miami")
        .to_string();
    let state = location_parts
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("FL")
        .to_string();

    (0..count)
        .map(|index| {
            let mut rng = seeded_rng(query, location, index);

            let has_website = rng.gen_bool(0.7);
            let has_phone = rng.gen_bool(0.8);
            let rating = (rng.gen_range(3.5..=5.0_f64) * 10.0).round() / 10.0;
            let review_count = rng.gen_range(10..510);

            let base_name = format!(
                "{} {} {}",
                pick(&NAME_PREFIXES, &mut rng),
                query.trim(),
                pick(&NAME_SUFFIXES, &mut rng)
            );
            let legal = pick(&LEGAL_SUFFIXES, &mut rng);
            let business_name = format!("{} {}", base_name, legal).trim().to_string();

            let address = format!(
                "{} {} {}",
                rng.gen_range(100..10_000),
                pick(&STREET_NAMES, &mut rng),
                pick(&STREET_TYPES, &mut rng)
            );
            let zip_code = rng.gen_range(10_000..100_000).to_string();

            let phone = has_phone.then(|| {
                format!(
                    "({}) {}-{}",
                    rng.gen_range(200..1000),
                    rng.gen_range(200..1000),
                    rng.gen_range(1000..10_000)
                )
            });
            let website = has_website.then(|| {
                let slug: String = base_name
                    .chars()
                    .filter(|c| c.is_ascii_alphanumeric())
                    .collect::<String>()
                    .to_lowercase();
                format!("https://www.{}.com", slug)
            });

            RawCandidate {
                business_name,
                category: query.to_string(),
                address,
                city: city.clone(),
                state: state.clone(),
                zip_code,
                phone,
                website,
                rating: Some(rating),
                review_count: Some(review_count),
                latitude: Some(25.7617 + rng.gen_range(-0.25..0.25)),
                longitude: Some(-80.1918 + rng.gen_range(-0.25..0.25)),
            }
        })
        .collect()
}

fn pick<'a>(options: &[&'a str], rng: &mut ChaCha8Rng) -> &'a str {
    options[rng.gen_range(0..options.len())]
}

/// One generator per record, seeded from the SHA-256 of the normalized search.
fn seeded_rng(query: &str, location: &str, index: usize) -> ChaCha8Rng {
    let mut hasher = Sha256::new();
    hasher.update(query.trim().to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(location.trim().to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update((index as u64).to_le_bytes());
    ChaCha8Rng::from_seed(hasher.finalize().into())
}
