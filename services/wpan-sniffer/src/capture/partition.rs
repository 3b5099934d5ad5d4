//! Split the requested channel list across capture devices

/// Divide `channels` into `devices` contiguous sublists.
///
/// Every device gets `len / devices` channels and the first `len % devices`
/// devices get one more. Concatenating the result in order gives back the
/// input. No devices means no assignments.
pub fn partition_channels(channels: &[u8], devices: usize) -> Vec<Vec<u8>> {
    if devices == 0 {
        return Vec::new();
    }

    let base = channels.len() / devices;
    let extra = channels.len() % devices;
    let mut assignments = Vec::with_capacity(devices);
    let mut start = 0;

    for i in 0..devices {
        let size = if i < extra { base + 1 } else { base };
        assignments.push(channels[start..start + size].to_vec());
        start += size;
    }

    assignments
}
