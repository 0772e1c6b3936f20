use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

/// Vocabulary and label lookups shared by every architecture.
///
/// Word indices start at 1 (0 is padding) and the unknown word takes
/// `ind2w.len() + 1`. Label indices start at 0.
#[derive(Debug, Clone, Default)]
pub struct Dicts {
    pub ind2w: BTreeMap<usize, String>,
    pub w2ind: HashMap<String, usize>,
    pub ind2c: BTreeMap<usize, String>,
    pub c2ind: HashMap<String, usize>,
    /// Label code -> word indices of its textual description.
    pub dv: HashMap<String, Vec<u32>>,
}

impl Dicts {
    /// Builds the lookups from in-memory word and code lists. Both lists are
    /// deduplicated and sorted before indices are assigned.
    pub fn new<W, C>(words: W, codes: C, dv: HashMap<String, Vec<u32>>) -> Self
    where
        W: IntoIterator,
        W::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let words: BTreeSet<String> = words.into_iter().map(Into::into).collect();
        let codes: BTreeSet<String> = codes.into_iter().map(Into::into).collect();

        let ind2w: BTreeMap<usize, String> = words
            .into_iter()
            .enumerate()
            .map(|(i, w)| (i + 1, w))
            .collect();
        let w2ind = ind2w.iter().map(|(i, w)| (w.clone(), *i)).collect();

        let ind2c: BTreeMap<usize, String> = codes.into_iter().enumerate().collect();
        let c2ind = ind2c.iter().map(|(i, c)| (c.clone(), *i)).collect();

        Dicts {
            ind2w,
            w2ind,
            ind2c,
            c2ind,
            dv,
        }
    }

    pub fn load<P: AsRef<Path>>(vocab: P, codes: P, descriptions: Option<P>) -> Result<Self> {
        let words = load_vocab(vocab)?;
        let codes = load_codes(codes)?;
        let dv = match descriptions {
            Some(path) => load_description_vectors(path)?,
            None => HashMap::new(),
        };
        let dicts = Dicts::new(words, codes, dv);
        log::info!(
            "Loaded lookups: {} words, {} labels, {} label descriptions",
            dicts.ind2w.len(),
            dicts.ind2c.len(),
            dicts.dv.len()
        );
        Ok(dicts)
    }

    pub fn num_labels(&self) -> usize {
        self.ind2c.len()
    }

    /// Index of the unknown-word token.
    pub fn unk_index(&self) -> usize {
        self.ind2w.len() + 1
    }

    /// Rows of a randomly initialized embedding table: words + padding + unknown.
    pub fn vocab_size(&self) -> usize {
        self.ind2w.len() + 2
    }

    /// Maps tokens to word indices, unknown words to `unk_index`.
    pub fn encode_words<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<u32> {
        tokens
            .iter()
            .map(|t| {
                self.w2ind
                    .get(t.as_ref())
                    .copied()
                    .unwrap_or_else(|| self.unk_index()) as u32
            })
            .collect()
    }
}

/// One word per line, blank lines skipped.
pub fn load_vocab<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read vocabulary file: {:?}", path))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

/// One code per line. Delimited files contribute their first column.
pub fn load_codes<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read codes file: {:?}", path))?;
    Ok(content
        .lines()
        .filter_map(|l| l.split(|c| c == ',' || c == '\t').next())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect())
}

/// Lines of `code idx idx ...`. A leading header line is skipped.
pub fn load_description_vectors<P: AsRef<Path>>(path: P) -> Result<HashMap<String, Vec<u32>>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read description vectors: {:?}", path))?;

    let mut dv = HashMap::new();
    for (line_no, line) in content.lines().enumerate() {
        let mut fields = line.split_whitespace();
        let code = match fields.next() {
            Some(code) => code,
            None => continue,
        };
        let indices: std::result::Result<Vec<u32>, _> = fields.map(str::parse::<u32>).collect();
        match indices {
            Ok(vec) => {
                dv.insert(code.to_string(), vec);
            }
            Err(_) if line_no == 0 => continue,
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Invalid word index on line {} of {:?}", line_no + 1, path)
                })
            }
        }
    }
    Ok(dv)
}
