#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use dominant_color_service::{
    DeletionScheduler, ManualClock, MemoryStore, SchedulerConfig, UploadPolicy, UploadService,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

pub const DELAY: Duration = Duration::from_secs(60);

pub fn solid_image(width: u32, height: u32, rgb: [u8; 3], format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(rgb));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), format)
        .unwrap();
    buf
}

pub fn solid_png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    solid_image(width, height, rgb, ImageFormat::Png)
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub scheduler: DeletionScheduler,
    pub service: Arc<UploadService>,
}

pub fn harness(policy: UploadPolicy) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new());
    let scheduler = DeletionScheduler::start(
        store.clone(),
        clock.clone(),
        SchedulerConfig {
            delay: DELAY,
            ..SchedulerConfig::default()
        },
    );
    let service = Arc::new(UploadService::new(store.clone(), scheduler.clone(), policy));
    Harness {
        store,
        clock,
        scheduler,
        service,
    }
}

/// Let spawned tasks run without moving the manual clock.
pub async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

/// Wait (in real time, bounded) until `done` holds.
pub async fn eventually(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
