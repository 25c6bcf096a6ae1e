use std::sync::Arc;

use crate::application::items::ItemService;

#[derive(Clone)]
pub struct ApiState {
    pub items: Arc<ItemService>,
}
