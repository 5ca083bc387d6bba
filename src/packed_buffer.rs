// Flat f32 storage for one per-particle attribute. Every logical index owns
// `component_count` consecutive floats, so index `i` lives at
// `[i * component_count, (i + 1) * component_count)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedBuffer {
    data: Vec<f32>,
    component_count: usize,
    // Extra offset added to every write, in elements.
    index_offset: usize,
}

impl PackedBuffer {
    pub fn new(size: usize, component_count: usize) -> Self {
        PackedBuffer::with_index_offset(size, component_count, 0)
    }

    pub fn with_index_offset(size: usize, component_count: usize, index_offset: usize) -> Self {
        let component_count = component_count.max(1);
        PackedBuffer {
            data: vec![0.0; size * component_count],
            component_count,
            index_offset,
        }
    }

    pub fn component_count(&self) -> usize {
        self.component_count
    }

    /// Number of logical entries (not floats).
    pub fn len(&self) -> usize {
        self.data.len() / self.component_count
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Resizes to `size` logical entries, growing or shrinking as needed.
    pub fn set_size(&mut self, size: usize) {
        let current = self.len();
        if size < current {
            self.shrink(size);
        } else if size > current {
            self.grow(size);
        }
    }

    /// Grows to `size` entries. Existing contents are kept, the tail is zeroed.
    pub fn grow(&mut self, size: usize) {
        let elements = size * self.component_count;
        if elements > self.data.len() {
            self.data.resize(elements, 0.0);
        }
    }

    /// Truncates to `size` entries. Trailing data is discarded.
    pub fn shrink(&mut self, size: usize) {
        self.data.truncate(size * self.component_count);
    }

    /// Removes entries `[start, end)`, moving everything after `end` down.
    pub fn splice(&mut self, start: usize, end: usize) {
        let len = self.len();
        let start = start.min(len);
        let end = end.clamp(start, len);
        self.data
            .drain(start * self.component_count..end * self.component_count);
    }

    fn element(&self, index: usize) -> usize {
        self.index_offset + index * self.component_count
    }

    pub fn set_number(&mut self, index: usize, value: f32) {
        let i = self.element(index);
        self.data[i] = value;
    }

    pub fn set_vec2_components(&mut self, index: usize, x: f32, y: f32) {
        let i = self.element(index);
        self.data[i] = x;
        self.data[i + 1] = y;
    }

    pub fn set_vec3_components(&mut self, index: usize, x: f32, y: f32, z: f32) {
        let i = self.element(index);
        self.data[i] = x;
        self.data[i + 1] = y;
        self.data[i + 2] = z;
    }

    pub fn set_vec3(&mut self, index: usize, v: cgmath::Vector3<f32>) {
        self.set_vec3_components(index, v.x, v.y, v.z);
    }

    pub fn set_vec4_components(&mut self, index: usize, x: f32, y: f32, z: f32, w: f32) {
        let i = self.element(index);
        self.data[i] = x;
        self.data[i + 1] = y;
        self.data[i + 2] = z;
        self.data[i + 3] = w;
    }

    pub fn set_vec4(&mut self, index: usize, v: [f32; 4]) {
        self.set_vec4_components(index, v[0], v[1], v[2], v[3]);
    }

    pub fn set_mat3(&mut self, index: usize, elements: &[f32; 9]) {
        self.set_components(index, elements);
    }

    pub fn set_mat4(&mut self, index: usize, elements: &[f32; 16]) {
        self.set_components(index, elements);
    }

    /// Writes one component of an entry.
    pub fn set_component(&mut self, index: usize, component: usize, value: f32) {
        let i = self.element(index) + component;
        self.data[i] = value;
    }

    fn set_components(&mut self, index: usize, values: &[f32]) {
        let i = self.element(index);
        self.data[i..i + values.len()].copy_from_slice(values);
    }

    /// All components of one entry.
    pub fn get(&self, index: usize) -> &[f32] {
        let i = self.element(index);
        &self.data[i..i + self.component_count]
    }

    pub fn get_component(&self, index: usize, component: usize) -> f32 {
        self.data[self.element(index) + component]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_keeps_contents_and_zeroes_tail() {
        let mut buffer = PackedBuffer::new(2, 3);
        buffer.set_vec3_components(1, 1.0, 2.0, 3.0);
        buffer.grow(4);
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.get(1), &[1.0, 2.0, 3.0]);
        assert_eq!(buffer.get(3), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn shrink_discards_trailing_entries() {
        let mut buffer = PackedBuffer::new(4, 1);
        for i in 0..4 {
            buffer.set_number(i, i as f32);
        }
        buffer.set_size(2);
        assert_eq!(buffer.as_slice(), &[0.0, 1.0]);
        // Growing again does not resurrect old data.
        buffer.set_size(3);
        assert_eq!(buffer.as_slice(), &[0.0, 1.0, 0.0]);
    }

    #[test]
    fn splice_compacts() {
        let mut buffer = PackedBuffer::new(5, 2);
        for i in 0..5 {
            buffer.set_vec2_components(i, i as f32, 10.0 * i as f32);
        }
        buffer.splice(1, 3);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.get(0), &[0.0, 0.0]);
        assert_eq!(buffer.get(1), &[3.0, 30.0]);
        assert_eq!(buffer.get(2), &[4.0, 40.0]);
    }

    #[test]
    fn splice_out_of_range_is_clamped() {
        let mut buffer = PackedBuffer::new(3, 1);
        buffer.splice(2, 10);
        assert_eq!(buffer.len(), 2);
        buffer.splice(5, 6);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn matrix_setters() {
        let mut buffer = PackedBuffer::new(2, 16);
        let mut m = [0.0; 16];
        for (i, v) in m.iter_mut().enumerate() {
            *v = i as f32;
        }
        buffer.set_mat4(1, &m);
        assert_eq!(buffer.get(1), &m[..]);
        assert_eq!(buffer.get_component(1, 15), 15.0);

        let mut m3 = PackedBuffer::new(1, 9);
        m3.set_mat3(0, &[1.0; 9]);
        assert_eq!(m3.get(0), &[1.0; 9][..]);
    }

    #[test]
    fn index_offset_shifts_writes() {
        let mut buffer = PackedBuffer::with_index_offset(3, 1, 1);
        buffer.set_number(0, 7.0);
        assert_eq!(buffer.as_slice(), &[0.0, 7.0, 0.0]);
    }
}
