//! Document indexing: Drive folder → chunks → embeddings → vector index.
//!
//! A full run rebuilds the collection from scratch. Files are processed one
//! at a time; a file that fails to download, chunk, embed, or upsert is
//! logged and skipped without aborting the run.

use anyhow::{anyhow, Result};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use nerdsiq_core::chunk::{chunk_document, SourceRef, Tokenizer};
use nerdsiq_core::models::{DocumentChunk, IndexPoint};
use nerdsiq_core::provider::{Distance, EmbeddingProvider, VectorIndex};

use crate::config::Config;
use crate::drive::{DocumentSource, DriveClient, DriveFile};
use crate::embedding::OpenAIEmbeddings;
use crate::qdrant::QdrantClient;
use crate::tokenizer::TiktokenTokenizer;

/// Id of the first point written by a run.
pub const FIRST_POINT_ID: u64 = 1;

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub collection: String,
    pub dims: usize,
    pub distance: Distance,
    pub chunk_size: usize,
    pub overlap: usize,
    /// Download and chunk only; the vector index is not touched.
    pub dry_run: bool,
}

impl IndexOptions {
    pub fn from_config(config: &Config, dry_run: bool) -> Result<Self> {
        Ok(Self {
            collection: config.qdrant.collection.clone(),
            dims: config.openai.dims,
            distance: config.qdrant.distance()?,
            chunk_size: config.chunking.chunk_size,
            overlap: config.chunking.overlap,
            dry_run,
        })
    }
}

/// Outcome of one indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub files_seen: usize,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub chunks: usize,
}

/// The collaborators an indexing run needs.
pub struct Indexer<'a> {
    pub source: &'a dyn DocumentSource,
    pub tokenizer: &'a dyn Tokenizer,
    pub embedder: &'a dyn EmbeddingProvider,
    pub index: &'a dyn VectorIndex,
}

impl Indexer<'_> {
    pub async fn index_folder(
        &self,
        folder_id: &str,
        options: &IndexOptions,
    ) -> Result<IndexReport> {
        if !options.dry_run {
            self.index
                .recreate_collection(&options.collection, options.dims, options.distance)
                .await?;
            info!(collection = %options.collection, dims = options.dims, "collection recreated");
        }

        let files = self.source.list_files(folder_id).await?;
        let mut report = IndexReport {
            files_seen: files.len(),
            ..IndexReport::default()
        };
        let mut next_id: u64 = FIRST_POINT_ID;

        for file in &files {
            if file.is_folder() {
                debug!(file = %file.name, "skipping subfolder");
                report.files_skipped += 1;
                continue;
            }

            match self.index_file(file, options, &mut next_id).await {
                Ok(0) => {
                    warn!(file = %file.name, "no content, skipping");
                    report.files_skipped += 1;
                }
                Ok(chunks) => {
                    info!(file = %file.name, chunks, "indexed file");
                    report.files_indexed += 1;
                    report.chunks += chunks;
                }
                Err(e) => {
                    error!(file = %file.name, error = %format!("{:#}", e), "failed to index file");
                    report.files_skipped += 1;
                }
            }
        }

        info!(
            files = report.files_seen,
            indexed = report.files_indexed,
            skipped = report.files_skipped,
            chunks = report.chunks,
            dry_run = options.dry_run,
            "indexing complete"
        );
        Ok(report)
    }

    /// Index one file, returning how many chunks it produced.
    async fn index_file(
        &self,
        file: &DriveFile,
        options: &IndexOptions,
        next_id: &mut u64,
    ) -> Result<usize> {
        let content = self.source.file_content(file).await?;
        if content.trim().is_empty() {
            return Ok(0);
        }

        let url = self.source.file_url(file);
        let source = SourceRef {
            source_id: &file.id,
            source_name: &file.name,
            source_url: &url,
        };
        let chunks = chunk_document(
            self.tokenizer,
            &content,
            options.chunk_size,
            options.overlap,
            &source,
        )?;
        if chunks.is_empty() || options.dry_run {
            return Ok(chunks.len());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        let points = build_points(&chunks, vectors, next_id)?;
        self.index.upsert(&options.collection, &points).await?;

        Ok(chunks.len())
    }
}

/// Pair chunks with their vectors under consecutive ids starting at `*next_id`.
fn build_points(
    chunks: &[DocumentChunk],
    vectors: Vec<Vec<f32>>,
    next_id: &mut u64,
) -> Result<Vec<IndexPoint>> {
    if vectors.len() != chunks.len() {
        return Err(anyhow!(
            "embedding count mismatch: {} chunks, {} vectors",
            chunks.len(),
            vectors.len()
        ));
    }

    Ok(chunks
        .iter()
        .zip(vectors)
        .map(|(chunk, vector)| {
            let id = *next_id;
            *next_id += 1;
            IndexPoint {
                id,
                vector,
                payload: chunk.payload(),
            }
        })
        .collect())
}

/// `nerdsiq index`: rebuild the collection from the configured Drive folder.
pub async fn run_index(config: &Config, folder: Option<String>, dry_run: bool) -> Result<()> {
    let folder_id = folder
        .or_else(|| config.drive.folder_id.clone())
        .filter(|f| !f.is_empty())
        .ok_or_else(|| anyhow!("No Drive folder: set [drive] folder_id or pass --folder"))?;

    let options = IndexOptions::from_config(config, dry_run)?;
    let source = DriveClient::from_service_account_file(&config.drive.service_account_file)?;
    let tokenizer = TiktokenTokenizer::for_model(&config.chunking.tokenizer_model)?;
    let api_key = config.openai_api_key()?;
    let embedder = OpenAIEmbeddings::new(&config.openai, api_key)?;
    let index = QdrantClient::new(&config.qdrant)?;

    let indexer = Indexer {
        source: &source,
        tokenizer: &tokenizer,
        embedder: &embedder,
        index: &index,
    };
    let report = indexer.index_folder(&folder_id, &options).await?;

    if dry_run {
        println!("index {} (dry-run)", folder_id);
    } else {
        println!("index {}", folder_id);
    }
    println!("  files found: {}", report.files_seen);
    println!("  files indexed: {}", report.files_indexed);
    println!("  files skipped: {}", report.files_skipped);
    println!("  chunks: {}", report.chunks);
    println!("ok");

    Ok(())
}
