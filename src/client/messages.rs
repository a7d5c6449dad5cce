//! Wire format of the Pl@ntNet identification API.
//!
//! These structures mirror the JSON returned by `POST /v2/identify/{project}`.
//! They are private to the crate; [`parse`] converts them into the public
//! [`IdentificationResult`] model.
//!
//! Parsing rules:
//! - unknown fields are ignored
//! - the scientific name, family and genus of every candidate are required
//! - the score is required and must lie in `[0.0, 1.0]`
//! - everything else falls back to an empty value when absent or `null`

use crate::error::IdentifyError;
use crate::types::{IdentificationResult, QueryEcho, ReferenceImage, SpeciesCandidate};
use serde::{Deserialize, Deserializer};

/// Reads an explicit `null` as the field's default value.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentifyResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    results: Vec<ResultEntry>,
    #[serde(default, deserialize_with = "null_as_default")]
    remaining_identification_requests: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    language: String,
    #[serde(default, deserialize_with = "null_as_default")]
    version: String,
    #[serde(default, deserialize_with = "null_as_default")]
    query: Query,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Query {
    #[serde(default, deserialize_with = "null_as_default")]
    project: String,
    #[serde(default, deserialize_with = "null_as_default")]
    organs: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    include_related_images: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultEntry {
    score: f64,
    species: Species,
    #[serde(default)]
    gbif: Option<Gbif>,
    #[serde(default, deserialize_with = "null_as_default")]
    images: Vec<ResultImage>,
    /// Some responses carry the common names next to the species object
    #[serde(default, deserialize_with = "null_as_default")]
    common_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Species {
    scientific_name_without_author: String,
    #[serde(default)]
    scientific_name_authorship: Option<String>,
    #[serde(default)]
    common_names: Option<Vec<String>>,
    family: Taxon,
    genus: Taxon,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Taxon {
    scientific_name_without_author: String,
}

/// The service sends GBIF ids either as a string or as a number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GbifId {
    Text(String),
    Number(u64),
}

#[derive(Debug, Deserialize)]
struct Gbif {
    #[serde(default)]
    id: Option<GbifId>,
}

#[derive(Debug, Default, Deserialize)]
struct ResultImage {
    #[serde(default, deserialize_with = "null_as_default")]
    organ: String,
    #[serde(default, deserialize_with = "null_as_default")]
    author: String,
    #[serde(default, deserialize_with = "null_as_default")]
    license: String,
    #[serde(default, deserialize_with = "null_as_default")]
    citation: String,
    #[serde(default, deserialize_with = "null_as_default")]
    date: DateInfo,
    #[serde(default, deserialize_with = "null_as_default")]
    url: ImageUrl,
}

#[derive(Debug, Default, Deserialize)]
struct DateInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    string: String,
}

#[derive(Debug, Default, Deserialize)]
struct ImageUrl {
    #[serde(default, deserialize_with = "null_as_default")]
    o: String,
    #[serde(default, deserialize_with = "null_as_default")]
    m: String,
    #[serde(default, deserialize_with = "null_as_default")]
    s: String,
}

/// Parses a raw identification response body.
///
/// Candidate order is kept exactly as returned by the service.
pub fn parse(raw: &str) -> Result<IdentificationResult, IdentifyError> {
    let response: IdentifyResponse = serde_json::from_str(raw)?;

    let candidates = response
        .results
        .into_iter()
        .enumerate()
        .map(|(rank, entry)| candidate_from(rank, entry))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(IdentificationResult {
        candidates,
        remaining_requests: response.remaining_identification_requests,
        language: response.language,
        version: response.version,
        query: QueryEcho {
            project: response.query.project,
            organs: response.query.organs,
            include_related_images: response.query.include_related_images,
        },
    })
}

fn candidate_from(rank: usize, entry: ResultEntry) -> Result<SpeciesCandidate, IdentifyError> {
    if !entry.score.is_finite() || !(0.0..=1.0).contains(&entry.score) {
        return Err(IdentifyError::MalformedResponse(format!(
            "result {rank} has score {} outside [0, 1]",
            entry.score
        )));
    }

    let species = entry.species;
    let common_names = species.common_names.unwrap_or(entry.common_names);
    let author = species
        .scientific_name_authorship
        .filter(|author| !author.is_empty());
    let gbif_id = entry.gbif.and_then(|gbif| gbif.id).map(|id| match id {
        GbifId::Text(text) => text,
        GbifId::Number(number) => number.to_string(),
    });

    Ok(SpeciesCandidate {
        scientific_name: species.scientific_name_without_author,
        author,
        common_names,
        family: species.family.scientific_name_without_author,
        genus: species.genus.scientific_name_without_author,
        score: entry.score,
        gbif_id,
        images: entry.images.into_iter().map(ReferenceImage::from).collect(),
    })
}

impl From<ResultImage> for ReferenceImage {
    fn from(image: ResultImage) -> Self {
        ReferenceImage {
            organ: image.organ,
            author: image.author,
            license: image.license,
            citation: image.citation,
            date: image.date.string,
            url_original: image.url.o,
            url_medium: image.url.m,
            url_small: image.url.s,
        }
    }
}
