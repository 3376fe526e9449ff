use criterion::{Criterion, black_box, criterion_group, criterion_main};

use texstream_core::codec::{ImageCodec, OitdCodec};
use texstream_core::{Image, PixelFormat, TextureBox, TextureFilters, TextureKind, filters};

fn noise_image(size: u32) -> Image {
    let mut image =
        Image::new_zeroed(size, size, 1, TextureKind::Type2D, PixelFormat::Rgba8Unorm, 1).unwrap();
    for (i, byte) in image.data_mut().iter_mut().enumerate() {
        *byte = (i.wrapping_mul(2654435761) >> 7) as u8;
    }
    image
}

// ---------------------------------------------------------------------------
// Box copies (what every upload does)
// ---------------------------------------------------------------------------

fn bench_copy_tile_256(c: &mut Criterion) {
    let image = noise_image(1024);
    let src_box = image.mip_box(0).sub_box(256, 256, 0, 256, 256, 1);
    let dst_box = TextureBox::packed(PixelFormat::Rgba8Unorm, 256, 256, 1, 1, 4, 0);
    let mut staging = vec![0u8; dst_box.end_offset()];
    c.bench_function("copy_tile_256_from_1024", |b| {
        b.iter(|| {
            TextureBox::copy(black_box(image.data()), &src_box, &mut staging, &dst_box).unwrap();
        });
    });
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

fn bench_generate_mipmaps_512(c: &mut Criterion) {
    let image = noise_image(512);
    c.bench_function("generate_mipmaps_512", |b| {
        b.iter(|| {
            black_box(
                filters::apply(image.clone(), TextureFilters::GENERATE_SW_MIPMAPS, false).unwrap(),
            )
        });
    });
}

fn bench_leave_channel_r_512(c: &mut Criterion) {
    let image = noise_image(512);
    c.bench_function("leave_channel_r_512", |b| {
        b.iter(|| {
            black_box(filters::apply(image.clone(), TextureFilters::LEAVE_CHANNEL_R, false).unwrap())
        });
    });
}

// ---------------------------------------------------------------------------
// Codecs
// ---------------------------------------------------------------------------

fn bench_oitd_decode_1024(c: &mut Criterion) {
    let bytes = OitdCodec.encode(&noise_image(1024)).unwrap();
    c.bench_function("oitd_decode_1024", |b| {
        b.iter(|| black_box(OitdCodec.decode(black_box(&bytes)).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_copy_tile_256,
    bench_generate_mipmaps_512,
    bench_leave_channel_r_512,
    bench_oitd_decode_1024,
);
criterion_main!(benches);
