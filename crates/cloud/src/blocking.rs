//! Blocking [`ItemSource`] backed by a STAC API and remote COGs.
//!
//! Wraps the async [`StacClient`] and [`CogReader`] in a single-threaded
//! Tokio runtime so the export pipeline can stay synchronous.

use tracing::debug;

use lcexport_core::raster::Raster;

use crate::cog::{BBox, CogReader, CogReaderOptions};
use crate::error::{CloudError, Result};
use crate::export::{ItemSource, YearRange, DEFAULT_COLLECTION};
use crate::stac_client::{StacCatalog, StacClient, StacClientOptions};
use crate::stac_models::{StacItem, StacSearchParams};

/// [`ItemSource`] reading from a live catalog.
pub struct StacSource {
    rt: tokio::runtime::Runtime,
    client: StacClient,
    reader_options: CogReaderOptions,
    collection: String,
}

impl StacSource {
    pub fn new(
        catalog: StacCatalog,
        client_options: StacClientOptions,
        reader_options: CogReaderOptions,
    ) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| CloudError::Network(e.to_string()))?;
        let client = StacClient::new(catalog, client_options)?;
        Ok(Self {
            rt,
            client,
            reader_options,
            collection: DEFAULT_COLLECTION.to_string(),
        })
    }

    /// Collection used to sign items that do not name their own.
    /// Each [`search`](ItemSource::search) replaces it.
    pub fn with_collection(mut self, collection: &str) -> Self {
        self.collection = collection.to_string();
        self
    }

    pub fn client(&self) -> &StacClient {
        &self.client
    }

    /// Signed href of `asset`, ready for range reads (blocking).
    pub fn signed_href(&self, item: &StacItem, asset: &str) -> Result<String> {
        let href = &item
            .asset(asset)
            .ok_or_else(|| CloudError::MissingAsset {
                item: item.id.clone(),
                asset: asset.to_string(),
            })?
            .href;
        let collection = item.collection.as_deref().unwrap_or(&self.collection);
        self.rt.block_on(self.client.sign_asset_href(href, collection))
    }

    /// One search, following pagination (blocking).
    pub fn search_params(&self, params: &StacSearchParams) -> Result<Vec<StacItem>> {
        self.rt.block_on(self.client.search_all(params))
    }
}

impl ItemSource for StacSource {
    fn search(
        &mut self,
        collection: &str,
        bbox: &BBox,
        years: Option<YearRange>,
    ) -> Result<Vec<StacItem>> {
        let mut params = StacSearchParams::new()
            .bbox(bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y)
            .collections(&[collection]);
        if let Some(range) = years {
            params = params.years(range.start, range.end);
        }
        self.collection = collection.to_string();
        self.search_params(&params)
    }

    fn read_window(
        &mut self,
        item: &StacItem,
        asset: &str,
        bbox: &BBox,
    ) -> Result<Option<Raster<i32>>> {
        let url = self.signed_href(item, asset)?;
        let http = self.client.http().clone();
        let options = self.reader_options.clone();
        let result = self.rt.block_on(async {
            let mut reader = CogReader::open_with_client(http, &url, options).await?;
            reader.read_bbox::<i32>(bbox).await
        });

        match result {
            Ok(raster) => Ok(Some(raster)),
            Err(CloudError::BBoxOutside) => {
                debug!("{} does not overlap the window", item.id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
