//! Binary persistence of a trained network.
//!
//! Little-endian throughout: the network input count as `u32`, then for every layer its
//! kind tag, the payload length and the payload, each header field a `u32`. Training
//! settings (batch size, optimizer, schedules) are not part of the format; they come from
//! the builder passed to [`from_bytes`].

use std::fs;
use std::io::Cursor;
use std::path::Path;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    error::{NetError, NetResult},
    initializer::RandomNetInitializer,
    layer::{Layer, LayerBase, LayerKind},
    net::{Network, NetworkBuilder},
};

pub fn to_bytes(net: &Network) -> NetResult<Vec<u8>> {
    if !net.is_initialized() {
        return Err(NetError::NotInitialized);
    }
    let mut out = Vec::new();
    out.write_u32::<LittleEndian>(net.input_size() as u32)?;
    let mut payload = Vec::new();
    for layer in net.layers() {
        payload.clear();
        layer.write_bytes(&mut payload);
        out.write_u32::<LittleEndian>(layer.kind().tag())?;
        out.write_u32::<LittleEndian>(payload.len() as u32)?;
        out.extend_from_slice(&payload);
    }
    Ok(out)
}

fn read_header(cursor: &mut Cursor<&[u8]>, what: &str) -> NetResult<u32> {
    cursor.read_u32::<LittleEndian>()
        .map_err(|_| NetError::Corrupt(format!("truncated {}", what)))
}

/// Rebuilds a network saved with [`to_bytes`], taking its training settings from `builder`.
pub fn from_bytes(bytes: &[u8], builder: NetworkBuilder) -> NetResult<Network> {
    let mut cursor = Cursor::new(bytes);
    let input_size = read_header(&mut cursor, "network header")? as usize;

    let mut layers = Vec::new();
    while (cursor.position() as usize) < bytes.len() {
        let kind = LayerKind::from_tag(read_header(&mut cursor, "layer tag")?)?;
        let len = read_header(&mut cursor, "layer length")? as usize;
        let start = cursor.position() as usize;
        let end = start.checked_add(len)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| NetError::Corrupt(format!(
                "{} layer payload of {} bytes runs past the end of the data", kind.name(), len
            )))?;
        layers.push(Layer::from_bytes(kind, &bytes[start..end])?);
        cursor.set_position(end as u64);
    }
    if layers.is_empty() {
        return Err(NetError::Corrupt("no layers".to_string()));
    }

    let mut net = builder.build_network()?;
    // loaded layers validate their parameters instead of drawing new ones
    let mut initializer = RandomNetInitializer::new_with_u64(0);
    net.initialize(input_size, layers, &mut initializer)?;
    Ok(net)
}

pub fn save(net: &Network, path: impl AsRef<Path>) -> NetResult<()> {
    let bytes = to_bytes(net)?;
    fs::write(path.as_ref(), bytes)?;
    info!("saved network to {}", path.as_ref().display());
    Ok(())
}

pub fn open(path: impl AsRef<Path>, builder: NetworkBuilder) -> NetResult<Network> {
    let bytes = fs::read(path.as_ref())?;
    let net = from_bytes(&bytes, builder)?;
    info!("loaded network with {} layers from {}", net.layers().len(), path.as_ref().display());
    Ok(net)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::buffer::Matrix;
    use crate::data::DataPoint;
    use crate::func::CompletionFn;
    use crate::initializer::NetInitializer;
    use crate::layer::Shape;
    use crate::utils::stable_hash_seed;
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    fn every_kind() -> Vec<Layer> {
        vec![
            Layer::conv2d(Shape::new(6, 6), Shape::new(3, 3), 2),
            Layer::batch_norm(),
            Layer::relu(),
            Layer::max_pool(Shape::new(2, 2)),
            Layer::flatten(),
            Layer::lstm(3, 4, true),
            Layer::tanh(),
            Layer::variable_linear(3, 2),
            Layer::lanh(),
            Layer::linear(4),
            Layer::sigmoid(),
            Layer::linear(3),
            Layer::softmax(),
        ]
    }

    fn trained_network() -> Network {
        let mut net = NetworkBuilder::default().batch_size(4).build_network().unwrap();
        let mut init = RandomNetInitializer::new_with_seed("round trip");
        net.initialize(36, every_kind(), &mut init).unwrap();

        let data: Vec<DataPoint> = (0..8).map(|i| DataPoint::new(
            (0..36).map(|_| init.sample_normal()).collect(),
            crate::data::to_one_hot(i % 3, 3),
        )).collect();
        let mut rng = XorShiftRng::from_seed(stable_hash_seed("round trip"));
        net.train(&data, &[], CompletionFn::stop_after_batches(3), &mut rng).unwrap();
        net
    }

    #[test]
    fn test_round_trip_every_kind() {
        let net = trained_network();
        let bytes = to_bytes(&net).unwrap();
        let loaded = from_bytes(&bytes, NetworkBuilder::default()).unwrap();

        let kinds: Vec<LayerKind> = loaded.layers().iter().map(LayerBase::kind).collect();
        assert_eq!(kinds, net.layers().iter().map(LayerBase::kind).collect::<Vec<_>>());
        assert_eq!(to_bytes(&loaded).unwrap(), bytes);

        let mut init = RandomNetInitializer::new_with_seed("inputs");
        for _ in 0..10 {
            let input: Vec<f64> = (0..36).map(|_| init.sample_normal()).collect();
            let expected = net.evaluate(&input).unwrap();
            let actual = loaded.evaluate(&input).unwrap();
            assert_eq!(expected.len(), 3);
            for (e, a) in expected.iter().zip(actual.iter()) {
                assert_eq!(e.to_bits(), a.to_bits());
            }
        }
    }

    #[test]
    fn test_truncated_data() {
        let net = trained_network();
        let bytes = to_bytes(&net).unwrap();
        for &cut in &[2, 6, 10, 13, 100, bytes.len() - 1] {
            match from_bytes(&bytes[..cut], NetworkBuilder::default()) {
                Err(NetError::Corrupt(_)) => {},
                other => panic!("cut at {}: unexpected {:?}", cut, other.map(|n| n.layers().len())),
            }
        }
    }

    #[test]
    fn test_unknown_tag() {
        let mut bytes = Vec::new();
        bytes.write_u32::<LittleEndian>(2).unwrap();
        bytes.write_u32::<LittleEndian>(42).unwrap();
        bytes.write_u32::<LittleEndian>(0).unwrap();
        match from_bytes(&bytes, NetworkBuilder::default()) {
            Err(NetError::UnknownLayerKind(42)) => {},
            other => panic!("unexpected {:?}", other.map(|n| n.layers().len())),
        }
    }

    #[test]
    fn test_trailing_payload_bytes() {
        let mut net = NetworkBuilder::default().build_network().unwrap();
        let layer = crate::layer::LinearLayer::with_parameters(Matrix::zeros(1, 2), Matrix::zeros(1, 1));
        let mut init = RandomNetInitializer::new_with_seed("trailing");
        net.initialize(2, vec![Layer::Linear(layer)], &mut init).unwrap();
        let mut bytes = to_bytes(&net).unwrap();
        // grow the declared payload length by 8 and append a stray f64
        let len = (&bytes[8..12]).read_u32::<LittleEndian>().unwrap();
        (&mut bytes[8..12]).write_u32::<LittleEndian>(len + 8).unwrap();
        bytes.extend_from_slice(&[0u8; 8]);
        match from_bytes(&bytes, NetworkBuilder::default()) {
            Err(NetError::Corrupt(_)) => {},
            other => panic!("unexpected {:?}", other.map(|n| n.layers().len())),
        }
    }

    #[test]
    fn test_save_and_open() {
        let net = trained_network();
        let path = std::env::temp_dir().join(format!("seqnet_save_{}.bin", std::process::id()));
        save(&net, &path).unwrap();
        let loaded = open(&path, NetworkBuilder::default()).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(to_bytes(&loaded).unwrap(), to_bytes(&net).unwrap());

        match open(&path, NetworkBuilder::default()) {
            Err(NetError::Io(_)) => {},
            other => panic!("unexpected {:?}", other.map(|n| n.layers().len())),
        }
    }

    #[test]
    fn test_uninitialized_network_is_not_saved() {
        let net = NetworkBuilder::default().build_network().unwrap();
        match to_bytes(&net) {
            Err(NetError::NotInitialized) => {},
            other => panic!("unexpected {:?}", other),
        }
    }

}
